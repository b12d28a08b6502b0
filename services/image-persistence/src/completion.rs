use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// One-shot gate fired after every processed message
///
/// Clones share the same gate. Once fired it stays open: waiters that arrive
/// later return immediately.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

struct Inner {
    fired: watch::Sender<bool>,
    fire_count: AtomicU64,
}

impl CompletionSignal {
    /// Create an armed, unfired signal
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fired,
                fire_count: AtomicU64::new(0),
            }),
        }
    }

    /// Fire the signal
    pub fn fire(&self) {
        self.inner.fire_count.fetch_add(1, Ordering::SeqCst);
        self.inner.fired.send_replace(true);
    }

    /// Whether the signal has fired at least once
    pub fn is_fired(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Number of times the signal has fired
    pub fn fire_count(&self) -> u64 {
        self.inner.fire_count.load(Ordering::SeqCst)
    }

    /// Wait until the signal has fired
    pub async fn wait(&self) {
        let mut rx = self.inner.fired.subscribe();
        // The sender lives in `inner`, so the channel cannot close while we hold `self`
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("fired", &self.is_fired())
            .field("fire_count", &self.fire_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_blocks_until_first_fire() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unblock")
            .unwrap();
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_never_resets() {
        let signal = CompletionSignal::new();
        signal.fire();
        signal.fire();

        assert_eq!(signal.fire_count(), 2);
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("fired signal must not block");
    }
}
