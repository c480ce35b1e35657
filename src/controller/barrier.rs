//! Startup barrier gating event processing on the initial bulk listing

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot barrier. Reconcile handlers `wait` on it; `release` is called
/// exactly once, after the store has been populated from the initial node
/// listing. Waiting after release is effectively free.
#[derive(Clone, Debug)]
pub struct StartupBarrier {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl StartupBarrier {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Create a barrier that is already open, for contexts (and tests) that
    /// do not need startup gating.
    pub fn released() -> Self {
        let barrier = Self::new();
        barrier.release();
        barrier
    }

    pub fn release(&self) {
        // Send only fails with no receivers; we always hold one.
        let _ = self.tx.send(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|released| *released).await;
    }

    pub fn is_released(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for StartupBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wait_blocks_until_release() {
        let barrier = StartupBarrier::new();
        assert!(!barrier.is_released());

        let waiter = barrier.clone();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), waiter.wait()).await;
        assert!(blocked.is_err(), "wait returned before release");

        barrier.release();
        assert!(barrier.is_released());
        tokio::time::timeout(Duration::from_secs(1), barrier.wait())
            .await
            .expect("wait completes after release");
    }

    #[tokio::test]
    async fn test_released_barrier_is_open() {
        let barrier = StartupBarrier::released();
        assert!(barrier.is_released());
        barrier.wait().await;
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let barrier = StartupBarrier::new();
        barrier.release();
        barrier.release();
        barrier.wait().await;
    }
}
