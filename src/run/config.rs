use std::time::Duration;

use crate::error::ValidationError;
use crate::http::TransportOptions;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_REQUESTS: u64 = 200;
/// Result slots reserved per worker before the ceiling applies.
const RESULTS_PER_WORKER: usize = 1000;
pub const MAX_RESULT_CAPACITY: usize = 1_000_000;
/// Ceiling on the idle pool when the transport does not set one.
const MAX_IDLE_CONNECTIONS: usize = 500;

/// Load parameters for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Total requests; `0` runs until `run_timeout`.
    pub requests: u64,
    pub concurrency: usize,
    /// Aggregate requests per second; `0` is unlimited.
    pub qps: f64,
    pub run_timeout: Option<Duration>,
    pub transport: TransportOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            requests: DEFAULT_REQUESTS,
            concurrency: DEFAULT_CONCURRENCY,
            qps: 0.0,
            run_timeout: None,
            transport: TransportOptions::default(),
        }
    }
}

impl RunConfig {
    /// # Errors
    ///
    /// Returns an error for zero concurrency, an unbounded run without a
    /// timeout, a negative or non-finite rate, or an unusable proxy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        if self.requests == 0 && self.run_timeout.is_none_or(|timeout| timeout.is_zero()) {
            return Err(ValidationError::UnboundedRun);
        }
        if !self.qps.is_finite() || self.qps < 0.0 {
            return Err(ValidationError::InvalidRate { value: self.qps });
        }
        self.transport.validate()
    }

    /// Requests each worker issues, `floor(N / C)`; `None` when unbounded.
    #[must_use]
    pub fn per_worker_quota(&self) -> Option<u64> {
        if self.requests == 0 {
            return None;
        }
        let workers = u64::try_from(self.concurrency).unwrap_or(u64::MAX);
        Some(self.requests.checked_div(workers).unwrap_or(0))
    }

    /// Requests left over by the even split, `N % C`. They are never issued.
    #[must_use]
    pub fn dropped_requests(&self) -> u64 {
        let workers = u64::try_from(self.concurrency).unwrap_or(u64::MAX);
        self.requests.checked_rem(workers).unwrap_or(0)
    }

    #[must_use]
    pub fn result_capacity(&self) -> usize {
        self.concurrency
            .saturating_mul(RESULTS_PER_WORKER)
            .clamp(1, MAX_RESULT_CAPACITY)
    }

    #[must_use]
    pub fn idle_connection_cap(&self) -> usize {
        self.transport
            .max_idle_per_host
            .unwrap_or_else(|| self.concurrency.min(MAX_IDLE_CONNECTIONS))
    }
}
