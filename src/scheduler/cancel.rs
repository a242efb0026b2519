//! Run-level cancellation signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable cancellation flag shared by everything working on one run.
///
/// Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `changed` only errors if
        // every clone is gone, which cannot happen while we hold one.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drives `fut` to completion unless the signal is raised first. After
    /// the signal, `fut` has `grace` to finish before it is dropped, in which
    /// case `None` is returned.
    pub async fn with_grace<F: Future>(&self, grace: Duration, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        tokio::select! {
            out = &mut fut => Some(out),
            _ = self.cancelled() => tokio::time::timeout(grace, &mut fut).await.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_with_grace_returns_output_without_cancel() {
        let signal = CancelSignal::new();
        let out = signal
            .with_grace(Duration::from_millis(10), async { 7 })
            .await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_grace_lets_short_work_finish() {
        let signal = CancelSignal::new();
        signal.cancel();
        let out = signal
            .with_grace(Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                "drained"
            })
            .await;
        assert_eq!(out, Some("drained"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_grace_abandons_slow_work() {
        let signal = CancelSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let out = signal
            .with_grace(Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;
        assert_eq!(out, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("should resolve immediately");
    }
}
