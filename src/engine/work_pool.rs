// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Work Pool
 * Semaphore-bounded task pool with blocking enqueue
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Bounded pool of spawned tasks. `spawn` suspends when the pool is
/// saturated, which is the scheduler's backpressure against an unbounded
/// target stream.
pub struct WorkPool<T: Send + 'static> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkPool<T> {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Enqueue a task, blocking until a worker slot frees up
    pub async fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        // acquire_owned never errors while the semaphore lives in self
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("work pool semaphore closed");
        self.tasks.spawn(async move {
            let result = future.await;
            drop(permit);
            result
        });
    }

    /// Wait for every spawned task, returning their outputs
    pub async fn drain(&mut self) -> Vec<T> {
        let mut results = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(value) = joined {
                results.push(value);
            }
        }
        results
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let mut pool: WorkPool<()> = WorkPool::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.spawn(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }
        pool.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_drain_collects_outputs() {
        let mut pool = WorkPool::new(2);
        for i in 0..5u32 {
            pool.spawn(async move { i * 2 }).await;
        }
        let mut results = pool.drain().await;
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6, 8]);
    }
}
