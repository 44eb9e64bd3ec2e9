//! Outstanding-work accounting.
//!
//! # Responsibilities
//! - Count units of work (accept loops, in-flight handlers) that must finish
//!   before shutdown is complete
//! - Propagate each unit into every ancestor tracker (endpoint → coordinator)
//! - Wake waiters when a counter returns to zero
//!
//! # Design Decisions
//! - Counting happens through an RAII guard, so the decrement runs exactly once
//!   on normal return, panic unwind, or future cancellation
//! - Waiting registers with `Notify` before checking the count; no polling

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Counter {
    active: AtomicUsize,
    idle: Notify,
}

impl Counter {
    fn enter(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "work counter underflow");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    fn load(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.load() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Shared counter of outstanding work.
///
/// Cloning yields another handle to the same counter. [`WorkTracker::child`]
/// creates a nested counter whose guards also count into this one, which is how
/// an endpoint's local count feeds the coordinator's process-wide count.
#[derive(Debug, Clone)]
pub struct WorkTracker {
    /// This tracker's counter first, then each ancestor up to the root.
    chain: Arc<[Arc<Counter>]>,
}

impl WorkTracker {
    /// Create a new root tracker with a zero count.
    pub fn new() -> Self {
        Self {
            chain: Arc::from(vec![Arc::new(Counter::default())]),
        }
    }

    /// Create a nested tracker that reports into this one.
    pub fn child(&self) -> Self {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.push(Arc::new(Counter::default()));
        chain.extend(self.chain.iter().cloned());
        Self {
            chain: Arc::from(chain),
        }
    }

    /// Record one unit of work. The returned guard releases it on drop.
    pub fn track(&self) -> WorkGuard {
        for counter in self.chain.iter() {
            counter.enter();
        }
        metrics::gauge!("frame_outstanding_work").increment(1.0);
        WorkGuard {
            chain: Arc::clone(&self.chain),
        }
    }

    /// Units of work currently outstanding on this tracker (children included).
    pub fn outstanding(&self) -> usize {
        self.chain[0].load()
    }

    /// Wait until the outstanding count is zero.
    ///
    /// Has no timeout of its own; wrap in `tokio::time::timeout` to bound it.
    pub async fn wait_idle(&self) {
        self.chain[0].wait_idle().await;
    }
}

impl Default for WorkTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of outstanding work. Decrements every tracker in its chain on drop.
#[derive(Debug)]
#[must_use = "work is released as soon as the guard is dropped"]
pub struct WorkGuard {
    chain: Arc<[Arc<Counter>]>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        for counter in self.chain.iter() {
            counter.exit();
        }
        metrics::gauge!("frame_outstanding_work").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tracker_counts() {
        let tracker = WorkTracker::new();
        assert_eq!(tracker.outstanding(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.outstanding(), 1);

        let guard2 = tracker.clone().track();
        assert_eq!(tracker.outstanding(), 2);

        drop(guard1);
        assert_eq!(tracker.outstanding(), 1);

        drop(guard2);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn child_counts_into_parent() {
        let root = WorkTracker::new();
        let endpoint = root.child();
        let other = root.child();

        let a = endpoint.track();
        let b = other.track();
        assert_eq!(endpoint.outstanding(), 1);
        assert_eq!(other.outstanding(), 1);
        assert_eq!(root.outstanding(), 2);

        drop(a);
        assert_eq!(endpoint.outstanding(), 0);
        assert_eq!(root.outstanding(), 1);
        drop(b);
        assert_eq!(root.outstanding(), 0);
    }

    #[test]
    fn guard_released_on_panic() {
        let tracker = WorkTracker::new();
        let inner = tracker.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.track();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_empty() {
        let tracker = WorkTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_idle())
            .await
            .expect("idle tracker should not block");
    }

    #[tokio::test]
    async fn wait_idle_wakes_on_last_release() {
        let tracker = WorkTracker::new();
        let guard = tracker.track();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
