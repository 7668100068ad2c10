use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Shortest tick the limiter schedules.
const MIN_PERIOD: Duration = Duration::from_micros(1);
/// Longest tick the limiter schedules; slower rates are clamped to it.
const MAX_PERIOD: Duration = Duration::from_secs(86_400);

/// Aggregate request throttle shared by every worker in a run.
///
/// One ticker task issues a permit every `1s / qps`. A permit that nobody
/// claimed is not topped up, so idle time never builds a burst.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    permits: Option<Arc<Semaphore>>,
    ticker: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Starts the ticker for `qps`; zero, negative or non-finite rates disable it.
    pub(crate) fn new(qps: f64) -> Self {
        let Some(period) = tick_period(qps) else {
            return Self::unlimited();
        };
        let permits = Arc::new(Semaphore::new(0));
        let ticker = spawn_fixed_interval_ticker(Arc::clone(&permits), period);
        Self {
            permits: Some(permits),
            ticker: Some(ticker),
        }
    }

    pub(crate) const fn unlimited() -> Self {
        Self {
            permits: None,
            ticker: None,
        }
    }

    pub(crate) const fn is_unlimited(&self) -> bool {
        self.permits.is_none()
    }

    /// Waits for the next permit. Returns `false` once the limiter is closed.
    pub(crate) async fn acquire(&self) -> bool {
        let Some(permits) = self.permits.as_ref() else {
            return true;
        };
        match permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_closed) => false,
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(permits) = self.permits.as_ref() {
            permits.close();
        }
    }
}

/// Interval between permits for `qps`, truncated to whole microseconds.
pub(crate) fn tick_period(qps: f64) -> Option<Duration> {
    if !qps.is_finite() || qps <= 0.0 {
        return None;
    }
    let exact = Duration::try_from_secs_f64(qps.recip()).unwrap_or(MAX_PERIOD);
    let micros = u64::try_from(exact.as_micros()).unwrap_or(u64::MAX);
    Some(
        Duration::from_micros(micros)
            .max(MIN_PERIOD)
            .min(MAX_PERIOD),
    )
}

fn spawn_fixed_interval_ticker(permits: Arc<Semaphore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if permits.is_closed() {
                break;
            }
            if permits.available_permits() == 0 {
                permits.add_permits(1);
            }
        }
    })
}
