//! Bounded worker pool for intra-request concurrency (spec.md §5): lazy-stack
//! realisation and STAC reads share a pool of this shape so a single request
//! can't flood the GDAL/HTTP layer, while independent keys still run
//! concurrently rather than one at a time.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Default cap on concurrently in-flight lazy-stack realisations or STAC
/// reads within a single request.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Caps how many of a set of futures run at once. A permit is acquired
/// around each future's own body rather than around the whole batch, so the
/// pool can be reused across calls without callers needing to size the
/// batch to the cap themselves.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        WorkerPool {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Runs `task` once per item in `items`, at most as many concurrently as
    /// this pool allows, returning results in the same order as `items`.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let futures = items.into_iter().map(|item| {
            let semaphore = Arc::clone(&self.semaphore);
            let fut = task(item);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("worker pool semaphore is never closed");
                fut.await
            }
        });
        join_all(futures).await
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new(DEFAULT_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn preserves_input_order() {
        let pool = WorkerPool::new(4);
        let results = pool.run(vec![3, 1, 2], |n| async move { n * 10 }).await;
        assert_eq!(results, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_cap() {
        let pool = WorkerPool::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let items: Vec<usize> = (0..10).collect();
        pool.run(items, |_| {
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
