use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A counting latch gating when a batch Message's replies may be encoded.
///
/// The handler `add`s the number of sub-Requests in a freshly-decoded batch
/// before handing it to the forwarder; the forwarder calls `done` exactly
/// once per sub-Request as each backend reply lands. `wait` resolves once
/// the count reaches zero. Spec §3/§9: "a typed counting latch owned by the
/// Message batch."
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

struct Inner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        CompletionBarrier {
            inner: Arc::new(Inner {
                remaining: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Registers `n` more sub-Requests that must complete before `wait`
    /// returns.
    pub fn add(&self, n: usize) {
        if n > 0 {
            self.inner.remaining.fetch_add(n, Ordering::SeqCst);
        }
    }

    /// Marks one sub-Request complete. Wakes any waiter once the count hits
    /// zero.
    pub fn done(&self) {
        let prev = self.inner.remaining.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev >= 1, "CompletionBarrier::done called more times than add");
        if prev == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolves once the outstanding count reaches zero.
    pub async fn wait(&self) {
        loop {
            if self.inner.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.inner.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_with_nothing_pending() {
        let b = CompletionBarrier::new();
        tokio::time::timeout(Duration::from_millis(50), b.wait())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_blocks_until_all_done_calls_land() {
        let b = CompletionBarrier::new();
        b.add(3);
        let waiter = b.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        b.done();
        b.done();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        b.done();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn done_calls_may_arrive_out_of_order() {
        let b = CompletionBarrier::new();
        b.add(5);
        for _ in 0..5 {
            b.done();
        }
        assert_eq!(b.remaining(), 0);
        tokio::time::timeout(Duration::from_millis(10), b.wait())
            .await
            .unwrap();
    }
}
