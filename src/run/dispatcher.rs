use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::http::{RateLimiter, RequestTemplate, build_client};
use crate::outcome::Outcome;
use crate::report::Reporter;
use crate::shutdown::StopSignal;

use super::config::RunConfig;
use super::context::RunContext;
use super::worker::{Worker, WorkerExit};

/// Where the reporter is in its lifecycle.
enum ReportStage<R> {
    Idle(R),
    Collecting,
    Drained {
        collector: JoinHandle<R>,
        elapsed: Duration,
    },
    Finishing,
    Finished(R),
}

/// Per-exit worker counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requests: u64,
    pub elapsed: Duration,
    pub workers_completed: usize,
    pub workers_stopped: usize,
    pub workers_timed_out: usize,
}

/// Drives one run: spawns the workers, joins them, and hands the results to
/// the reporter.
pub struct Dispatcher<R: Reporter> {
    config: RunConfig,
    template: Arc<RequestTemplate>,
    client: Client,
    stop: StopSignal,
    started: AtomicBool,
    stage: Mutex<ReportStage<R>>,
}

impl<R: Reporter> Dispatcher<R> {
    /// Validates the configuration and builds the shared client.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid run configuration or when the HTTP
    /// client cannot be built.
    pub fn new(config: RunConfig, template: RequestTemplate, reporter: R) -> EngineResult<Self> {
        config.validate()?;
        let client = build_client(
            &config.transport,
            config.idle_connection_cap(),
            template.url().scheme(),
        )?;
        let stop = StopSignal::new(config.concurrency);
        Ok(Self {
            config,
            template: Arc::new(template),
            client,
            stop,
            started: AtomicBool::new(false),
            stage: Mutex::new(ReportStage::Idle(reporter)),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Handle that can stop this run from another task.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Asks every worker to return before its next request. Never blocks.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Runs to completion: every worker has returned when this resolves.
    ///
    /// # Errors
    ///
    /// Returns an error when called a second time on the same dispatcher.
    pub async fn run(&self) -> EngineResult<RunSummary> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let reporter = match std::mem::replace(&mut *self.lock_stage(), ReportStage::Collecting) {
            ReportStage::Idle(reporter) => reporter,
            ReportStage::Collecting
            | ReportStage::Drained { .. }
            | ReportStage::Finishing
            | ReportStage::Finished(_) => return Err(EngineError::AlreadyStarted),
        };

        let concurrency = self.config.concurrency;
        let quota = self.config.per_worker_quota();
        let dropped = self.config.dropped_requests();
        if quota == Some(0) {
            warn!(
                "{} requests over {} workers leaves every worker without a request.",
                self.config.requests, concurrency
            );
        } else if dropped > 0 {
            warn!(
                "{} requests do not split evenly over {} workers; {} will not be sent.",
                self.config.requests, concurrency, dropped
            );
        }
        info!(
            "Starting run: requests={}, concurrency={}, qps={}, timeout={:?}",
            self.config.requests, concurrency, self.config.qps, self.config.run_timeout
        );

        let started_at = Instant::now();
        let (results_tx, results_rx) = mpsc::channel(self.config.result_capacity());
        let collector = tokio::spawn(collect(results_rx, reporter));

        let token = CancellationToken::new();
        let _cancel_on_exit = token.clone().drop_guard();
        let deadline = self
            .config
            .run_timeout
            .and_then(|timeout| started_at.checked_add(timeout));
        let watchdog = deadline.map(|deadline| spawn_deadline_watchdog(token.clone(), deadline));
        let context = RunContext::new(token, deadline);
        let limiter = Arc::new(RateLimiter::new(self.config.qps));

        let mut handles = Vec::with_capacity(concurrency);
        for id in 0..concurrency {
            let worker = Worker {
                id,
                quota,
                client: self.client.clone(),
                template: Arc::clone(&self.template),
                limiter: Arc::clone(&limiter),
                context: context.clone(),
                stop: self.stop.subscribe(),
                results: results_tx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(results_tx);

        let mut summary = RunSummary::default();
        for handle in handles {
            match handle.await {
                Ok((exit, issued)) => {
                    summary.requests = summary.requests.saturating_add(issued);
                    match exit {
                        WorkerExit::QuotaExhausted => {
                            summary.workers_completed = summary.workers_completed.saturating_add(1);
                        }
                        WorkerExit::Stopped | WorkerExit::ReporterClosed => {
                            summary.workers_stopped = summary.workers_stopped.saturating_add(1);
                        }
                        WorkerExit::DeadlineReached => {
                            summary.workers_timed_out = summary.workers_timed_out.saturating_add(1);
                        }
                    }
                }
                Err(err) => error!("Worker task failed: {}", err),
            }
        }
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        summary.elapsed = started_at.elapsed();

        *self.lock_stage() = ReportStage::Drained {
            collector,
            elapsed: summary.elapsed,
        };
        info!(
            "Run complete: {} requests in {:?}",
            summary.requests, summary.elapsed
        );
        Ok(summary)
    }

    /// Waits for the reporter to drain the closed result channel, then
    /// finalizes it. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error when the collector task failed.
    pub async fn finish(&self) -> EngineResult<()> {
        let stage = std::mem::replace(&mut *self.lock_stage(), ReportStage::Finishing);
        match stage {
            ReportStage::Drained { collector, elapsed } => {
                let mut reporter = collector.await?;
                reporter.finalize(elapsed);
                *self.lock_stage() = ReportStage::Finished(reporter);
            }
            ReportStage::Idle(mut reporter) => {
                reporter.finalize(Duration::ZERO);
                *self.lock_stage() = ReportStage::Finished(reporter);
            }
            ReportStage::Collecting => {
                warn!("finish() called while the run is in progress; ignoring.");
                *self.lock_stage() = ReportStage::Collecting;
            }
            ReportStage::Finishing => {}
            ReportStage::Finished(reporter) => {
                *self.lock_stage() = ReportStage::Finished(reporter);
            }
        }
        Ok(())
    }

    /// Error description to count, once finished; empty before that.
    #[must_use]
    pub fn error_dist(&self) -> BTreeMap<String, u64> {
        match &*self.lock_stage() {
            ReportStage::Finished(reporter) => reporter.error_dist().clone(),
            ReportStage::Idle(_)
            | ReportStage::Collecting
            | ReportStage::Drained { .. }
            | ReportStage::Finishing => BTreeMap::new(),
        }
    }

    /// Status code to count, once finished; empty before that.
    #[must_use]
    pub fn status_codes(&self) -> BTreeMap<u16, u64> {
        match &*self.lock_stage() {
            ReportStage::Finished(reporter) => reporter.status_code_dist().clone(),
            ReportStage::Idle(_)
            | ReportStage::Collecting
            | ReportStage::Drained { .. }
            | ReportStage::Finishing => BTreeMap::new(),
        }
    }

    /// Runs `inspect` against the finalized reporter.
    pub fn with_reporter<T>(&self, inspect: impl FnOnce(&R) -> T) -> Option<T> {
        match &*self.lock_stage() {
            ReportStage::Finished(reporter) => Some(inspect(reporter)),
            ReportStage::Idle(_)
            | ReportStage::Collecting
            | ReportStage::Drained { .. }
            | ReportStage::Finishing => None,
        }
    }

    fn lock_stage(&self) -> MutexGuard<'_, ReportStage<R>> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn collect<R: Reporter>(mut results: mpsc::Receiver<Outcome>, mut reporter: R) -> R {
    while let Some(outcome) = results.recv().await {
        reporter.record(outcome);
    }
    reporter
}

fn spawn_deadline_watchdog(token: CancellationToken, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep_until(deadline).await;
        info!("Run deadline reached, canceling in-flight requests.");
        token.cancel();
    })
}
