//! Bounded worker pool.
//!
//! A pool is a counting semaphore: admission waits for a free slot or for
//! the caller's cancellation token, whichever comes first, and the slot is
//! released when the admitted task drops it.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Cancelled before a worker slot was free")]
    Cancelled,

    #[error("Worker pool closed")]
    Closed,

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An occupied worker slot; dropping it frees the slot.
#[derive(Debug)]
pub struct Slot(#[allow(dead_code)] OwnedSemaphorePermit);

/// Fixed-width pool of worker slots. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    /// Pool running at most `limit` jobs at once (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, giving up when `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot, PoolError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            permit = self.slots.clone().acquire_owned() => {
                permit.map(Slot).map_err(|_| PoolError::Closed)
            }
        }
    }

    /// Run `job` on its own task once a slot is free.
    ///
    /// The slot is held until the job's future completes or is dropped.
    pub async fn submit<F, T>(
        &self,
        cancel: &CancellationToken,
        job: F,
    ) -> Result<JoinHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.acquire(cancel).await?;
        Ok(tokio::spawn(async move {
            let _slot = slot;
            job.await
        }))
    }

    /// Run `f` over every item with bounded parallelism.
    ///
    /// Returns the results in completion order once every job has finished.
    /// When `cancel` fires first, the remaining jobs are aborted and
    /// [`PoolError::Cancelled`] is returned.
    pub async fn for_each<I, F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        items: I,
        f: F,
    ) -> Result<Vec<T>, PoolError>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        let mut results = Vec::new();

        for item in items {
            let slot = match self.acquire(cancel).await {
                Ok(slot) => slot,
                Err(e) => {
                    tasks.shutdown().await;
                    return Err(e);
                }
            };
            let job = f(item);
            tasks.spawn(async move {
                let _slot = slot;
                job.await
            });

            // Reap as we go so finished results don't pile up in the set
            while let Some(done) = tasks.try_join_next() {
                results.push(done?);
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(PoolError::Cancelled);
                }
                done = tasks.join_next() => match done {
                    Some(done) => results.push(done?),
                    None => break,
                },
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.limit(), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let slot = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(slot);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_on_cancel() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }

    #[tokio::test]
    async fn test_submit_holds_slot_until_job_finishes() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = pool
            .submit(&cancel, async move {
                let _ = rx.await;
                7
            })
            .await
            .unwrap();
        assert_eq!(pool.available(), 0);

        tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 7);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_for_each_respects_limit() {
        let pool = WorkerPool::new(3);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .for_each(&cancel, 0..20u32, |i| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 20);
        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20u32).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_for_each_stops_on_cancel() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = pool
            .for_each(&cancel, 0..100, |_| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            })
            .await;

        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }
}
