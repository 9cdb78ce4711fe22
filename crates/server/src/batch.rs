use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;

/// Run `worker` over the items with at most `limit` in flight, sleeping
/// `delay` between chunks. The sweep never aborts early; a failed item only
/// affects its own slot in the returned vector.
pub async fn run_batched<T, F, Fut, R>(
    items: Vec<T>,
    limit: usize,
    delay: Duration,
    worker: F,
) -> Vec<R>
where
    T: Send,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = limit.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut remaining = items;

    while !remaining.is_empty() {
        let take = limit.min(remaining.len());
        let chunk: Vec<T> = remaining.drain(..take).collect();
        let chunk_results = join_all(chunk.into_iter().map(&worker)).await;
        results.extend(chunk_results);
        if !remaining.is_empty() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    results
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct JobProgress {
    pub active: bool,
    pub current: usize,
    pub total: usize,
    pub succeeded: usize,
}

/// Single-flight progress slot for one background job kind. `try_begin`
/// refuses a second run while the first is still active.
#[derive(Clone, Default)]
pub struct JobSlot {
    inner: Arc<Mutex<JobProgress>>,
}

impl JobSlot {
    pub fn try_begin(&self, total: usize) -> bool {
        let mut progress = self.inner.lock();
        if progress.active {
            return false;
        }
        *progress = JobProgress {
            active: true,
            current: 0,
            total,
            succeeded: 0,
        };
        true
    }

    pub fn tick(&self, success: bool) {
        let mut progress = self.inner.lock();
        progress.current += 1;
        if success {
            progress.succeeded += 1;
        }
    }

    pub fn finish(&self) {
        self.inner.lock().active = false;
    }

    pub fn snapshot(&self) -> JobProgress {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::{run_batched, JobSlot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn chunks_never_exceed_the_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<usize> = (0..10).collect();
        let results = run_batched(items, 3, Duration::ZERO, |n| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                n * 2
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert_eq!(results[4], 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_limit_still_makes_progress() {
        let results = run_batched(vec![1, 2], 0, Duration::ZERO, |n| async move { n }).await;
        assert_eq!(results, vec![1, 2]);
    }

    #[test]
    fn job_slot_is_single_flight() {
        let slot = JobSlot::default();
        assert!(slot.try_begin(5));
        assert!(!slot.try_begin(5));

        slot.tick(true);
        slot.tick(false);
        let progress = slot.snapshot();
        assert!(progress.active);
        assert_eq!(progress.current, 2);
        assert_eq!(progress.succeeded, 1);
        assert_eq!(progress.total, 5);

        slot.finish();
        assert!(!slot.snapshot().active);
        assert!(slot.try_begin(1));
    }
}
