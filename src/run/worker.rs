use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use crate::http::{RateLimiter, RequestTemplate, execute};
use crate::outcome::Outcome;
use crate::shutdown::StopListener;

use super::context::RunContext;

/// Why a worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    QuotaExhausted,
    Stopped,
    DeadlineReached,
    ReporterClosed,
}

/// One sequential request loop. Owns its request counter.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) quota: Option<u64>,
    pub(crate) client: Client,
    pub(crate) template: Arc<RequestTemplate>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) context: RunContext,
    pub(crate) stop: StopListener,
    pub(crate) results: mpsc::Sender<Outcome>,
}

impl Worker {
    /// Stop and deadline are checked between requests only; an in-flight
    /// request always finishes (or times out) and is reported first.
    pub(crate) async fn run(mut self) -> (WorkerExit, u64) {
        let mut issued: u64 = 0;
        let exit = loop {
            if self.quota.is_some_and(|quota| issued >= quota) {
                break WorkerExit::QuotaExhausted;
            }
            if self.stop.is_stopped() {
                break WorkerExit::Stopped;
            }
            if self.context.is_done() {
                break WorkerExit::DeadlineReached;
            }
            if !self.limiter.is_unlimited() {
                let admitted = tokio::select! {
                    admitted = self.limiter.acquire() => admitted,
                    () = self.stop.wait() => break WorkerExit::Stopped,
                    () = self.context.done() => break WorkerExit::DeadlineReached,
                };
                if !admitted {
                    break WorkerExit::Stopped;
                }
            }

            let outcome = execute(&self.context, &self.client, &self.template).await;
            issued = issued.saturating_add(1);
            if self.results.send(outcome).await.is_err() {
                break WorkerExit::ReporterClosed;
            }
        };
        debug!(
            "Worker {} exited after {} requests: {:?}",
            self.id, issued, exit
        );
        (exit, issued)
    }
}
