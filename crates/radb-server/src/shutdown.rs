//! Process-wide shutdown signal.
//!
//! Raised by `host:kill` or a termination signal; observed by the accept
//! loop, every session's reads, and the shell/sync pump tasks.

use tokio::sync::watch;

/// Cloneable shutdown handle. Triggering is idempotent.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the signal. Safe to call multiple times.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been raised.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is raised. Resolves immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
