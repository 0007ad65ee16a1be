//! Tracked callback dispatch.
//!
//! A [`DispatchTracker`] counts callback batches that have been handed to the
//! runtime but not finished yet, and lets a later batch wait until that count
//! drops to zero. Non-blocking directives use it so that end-of-stream
//! callbacks never run before the data-chunk callbacks of the same stream.
//!
//! The counter is incremented before the task is spawned, so a waiter never
//! observes zero while a spawned-but-unstarted task exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Wait-group over spawned callback tasks.
#[derive(Clone)]
pub(crate) struct DispatchTracker {
    outstanding: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl DispatchTracker {
    pub(crate) fn new() -> Self {
        let (notifier, _) = watch::channel(());
        Self {
            outstanding: Arc::new(AtomicUsize::new(0)),
            notifier: Arc::new(notifier),
        }
    }

    /// Number of tracked tasks not yet finished.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Run `work` on the blocking pool, counted until it returns (or panics).
    pub(crate) fn spawn_tracked<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.increment();
        let guard = DecrementGuard(self.clone());
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work();
        });
    }

    /// Run `work` on the blocking pool once every tracked task has finished.
    ///
    /// Not tracked itself.
    pub(crate) fn spawn_after_idle<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.wait_idle().await;
            if let Err(e) = tokio::task::spawn_blocking(work).await {
                tracing::warn!(error = %e, "Deferred callback task failed");
            }
        });
    }

    /// Resolve once the outstanding count is zero.
    pub(crate) async fn wait_idle(&self) {
        // Subscribe before reading the counter so a decrement in between is not missed.
        let mut changes = self.notifier.subscribe();
        while self.outstanding() > 0 {
            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    fn increment(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notifier.send_replace(());
        }
    }
}

/// Decrements on drop, so a panicking callback still releases its slot.
struct DecrementGuard(DispatchTracker);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deferred_work_waits_for_tracked_work() {
        let tracker = DispatchTracker::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = Arc::clone(&log);
            tracker.spawn_tracked(move || {
                std::thread::sleep(Duration::from_millis(20 * (5 - i)));
                log.lock().unwrap().push(format!("chunk-{i}"));
            });
        }

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let eof_log = Arc::clone(&log);
        tracker.spawn_after_idle(move || {
            eof_log.lock().unwrap().push("eof".to_string());
            let _ = done_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        assert_eq!(log.last().map(String::as_str), Some("eof"));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn panicking_work_still_releases_its_slot() {
        let tracker = DispatchTracker::new();
        tracker.spawn_tracked(|| panic!("callback failure"));

        tokio::time::timeout(Duration::from_secs(5), tracker.wait_idle())
            .await
            .unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn idle_tracker_does_not_wait() {
        let tracker = DispatchTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_idle())
            .await
            .unwrap();
    }
}
