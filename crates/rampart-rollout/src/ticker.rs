//! Ticker: an owned, cancellable periodic background task.
//!
//! Each controller owns its tickers. Stopping or dropping a ticker
//! signals shutdown and aborts the task, so no tick fires after
//! teardown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// A periodic task that calls `tick` every `interval`.
pub struct Ticker {
    name: &'static str,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Ticker {
    /// Spawn the ticker. The first tick fires one `interval` after start.
    pub fn start<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(ticker = name, "ticker shutting down");
                        break;
                    }
                }
            }
        });

        debug!(ticker = name, interval_secs = interval.as_secs(), "ticker started");

        Self {
            name,
            handle,
            shutdown_tx,
        }
    }

    /// Stop the ticker. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
