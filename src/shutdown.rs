//! Cooperative stop signal and the process signal handler that raises it.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Raises the stop request observed by workers between requests.
///
/// A flag remembers the request for listeners that subscribe later.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: broadcast::Sender<()>,
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    /// `capacity` is the number of workers that may listen.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never blocks; repeated calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.tx.send(()));
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscribe(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

/// One worker's view of the stop signal.
#[derive(Debug)]
pub struct StopListener {
    rx: broadcast::Receiver<()>,
    stopped: Arc<AtomicBool>,
}

impl StopListener {
    /// Non-blocking check.
    pub fn is_stopped(&mut self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_) | TryRecvError::Closed) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Resolves once a stop was requested.
    pub async fn wait(&mut self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        drop(self.rx.recv().await);
    }
}

/// Calls `stop` on Ctrl+C or SIGTERM. Ends after the first stop either way.
pub fn spawn_interrupt_handler(stop: StopSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut listener = stop.subscribe();

        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                () = listener.wait() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, stopping workers.");
                    stop.stop();
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    info!("SIGTERM received, stopping workers.");
                    stop.stop();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                () = listener.wait() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, stopping workers.");
                    stop.stop();
                }
            }
        }
    })
}
