//! One-shot, many-observer shutdown signal.
//!
//! Shared by a channel's read loop, writer task and public handles, and by
//! the listener's accept loop. Triggering is idempotent.

use tokio::sync::watch;

/// Latching shutdown flag.
#[derive(Clone)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Latch the flag. Returns `true` for the call that actually triggered.
    pub(crate) fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is latched (immediately if it already is).
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Err only if the sender is gone, and we hold it
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        let waiter = tokio::spawn(async move { observer.wait().await });

        tokio::task::yield_now().await;
        shutdown.trigger();
        waiter.await.unwrap();
    }
}
