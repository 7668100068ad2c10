//! The per-request outcome record handed to the reporter.
use std::time::Duration;

use crate::error::RequestError;

/// Sub-phase breakdown of one exchange. Phases that never happened are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// DNS lookup alone.
    pub dns: Duration,
    /// Connection setup including DNS; zero when a pooled connection was reused.
    pub connect: Duration,
    /// From having a connection to the request being fully written.
    pub write: Duration,
    /// Server think time: request written until the response head arrived.
    pub delay: Duration,
    /// Response head until the body was fully drained.
    pub read: Duration,
}

/// Result of one request attempt. Exactly one is produced per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub error: Option<RequestError>,
    /// Present only when `error` is absent.
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub timings: PhaseTimings,
    /// Response body bytes drained.
    pub content_length: u64,
}

impl Outcome {
    #[must_use]
    pub const fn success(
        status_code: u16,
        duration: Duration,
        timings: PhaseTimings,
        content_length: u64,
    ) -> Self {
        Self {
            error: None,
            status_code: Some(status_code),
            duration,
            timings,
            content_length,
        }
    }

    #[must_use]
    pub const fn failure(error: RequestError, duration: Duration, timings: PhaseTimings) -> Self {
        Self {
            error: Some(error),
            status_code: None,
            duration,
            timings,
            content_length: 0,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
