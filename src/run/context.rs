use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::RequestError;

/// Which bound cut a request short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadlineBound {
    Request,
    Run,
}

/// Run-wide cancellation shared by every worker.
///
/// The token is canceled when the run deadline passes and when the run ends.
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub(crate) const fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    pub(crate) fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Cancellation scope for one request, released by the caller.
    pub(crate) fn request_scope(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// The earlier of `origin + timeout` and the run deadline.
    pub(crate) fn request_deadline(
        &self,
        origin: Instant,
        timeout: Duration,
    ) -> Option<(Instant, DeadlineBound)> {
        match (origin.checked_add(timeout), self.deadline) {
            (Some(request), Some(run)) if run < request => Some((run, DeadlineBound::Run)),
            (Some(request), Some(_) | None) => Some((request, DeadlineBound::Request)),
            (None, Some(run)) => Some((run, DeadlineBound::Run)),
            (None, None) => None,
        }
    }

    /// Error recorded for a request whose scope was canceled by the run.
    pub(crate) fn cancellation_error(&self) -> RequestError {
        if self.deadline_passed() {
            RequestError::run_deadline()
        } else {
            RequestError::canceled()
        }
    }
}
