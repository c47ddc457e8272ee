use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared stop flag. Every loop and backoff wait selects on a receiver from
/// [`StopSignal::subscribe`].
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Stop on Ctrl-C or SIGTERM (`monitor stop` sends the latter).
    pub fn install_os_handlers(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            info!("Stop requested, shutting down");
            signal.stop();
        })
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_wakes_subscribers() {
        let signal = StopSignal::new();
        let mut rx = signal.subscribe();
        assert!(!signal.is_stopped());

        let clone = signal.clone();
        tokio::spawn(async move { clone.stop() });

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_stop_without_subscribers_is_remembered() {
        let signal = StopSignal::new();
        signal.stop();
        assert!(signal.is_stopped());
        assert!(*signal.subscribe().borrow());
    }
}
