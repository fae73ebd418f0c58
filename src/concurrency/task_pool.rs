use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::concurrency::Concurrency;
use crate::error::VangaError;

/// A bounded worker pool of `T` threads, created once per learner session.
///
/// Submission is FIFO via rayon's own work-stealing scheduler; an optional
/// capacity `Q` bounds the number of in-flight submissions. When `Q > 0` and
/// the pool is already at capacity, [`TaskPool::submit`] returns
/// [`VangaError::Overflow`] rather than blocking. `Q == 0` (the default)
/// means unbounded.
///
/// No task submitted to a `TaskPool` may block waiting on another task in
/// the same pool — all coordination with the caller goes through the
/// closure's return value.
pub struct TaskPool {
    pool: ThreadPool,
    capacity: usize,
    in_flight: AtomicUsize,
}

impl TaskPool {
    /// Builds a pool with `concurrency` worker threads and no queue bound.
    pub fn new(concurrency: Concurrency) -> Self {
        Self::bounded(concurrency, 0)
    }

    /// Builds a pool with `concurrency` worker threads and a queue bound of
    /// `capacity` in-flight submissions (`0` means unbounded).
    pub fn bounded(concurrency: Concurrency, capacity: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.value())
            .build()
            .expect("failed to start worker pool");
        Self {
            pool,
            capacity,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of worker threads in this pool.
    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `task` on the pool and returns its result, or
    /// `VangaError::Overflow` if the queue is bounded and full.
    ///
    /// The pool blocks the calling thread until `task` completes; this
    /// mirrors the "cooperatively joined at iteration boundaries" scheduling
    /// model rather than a fire-and-forget async submission.
    pub fn submit<F, R>(&self, task: F) -> Result<R, VangaError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        if self.capacity > 0 {
            let reserved = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            if reserved > self.capacity {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(VangaError::Overflow(format!(
                    "task queue at capacity ({})",
                    self.capacity
                )));
            }
            let result = self.pool.install(task);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(result)
        } else {
            Ok(self.pool.install(task))
        }
    }

    /// Runs `items` through `task` in parallel batches sized to the pool's
    /// concurrency, short-circuiting as soon as `task` returns `Err` or the
    /// cancel token fires.
    ///
    /// Grounded on the batched-rayon-iteration idiom used for per-node
    /// parallel work: a chunked `par_iter` rather than one rayon task per
    /// item, so scheduling overhead doesn't dominate for small items.
    pub fn for_each<T, F>(&self, items: &[T], task: F) -> Result<(), VangaError>
    where
        T: Sync,
        F: Fn(&T) -> Result<(), VangaError> + Sync,
    {
        use rayon::prelude::*;

        self.pool.install(|| items.par_iter().try_for_each(task))
    }

    /// Maps `items` through `task` in parallel, collecting every result.
    ///
    /// Used by the tree learner to evaluate all frontier leaves' candidate
    /// splits for one iteration concurrently before joining at the
    /// rendezvous that picks the winner.
    pub fn map<T, R, F>(&self, items: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        use rayon::prelude::*;

        self.pool.install(|| items.par_iter().map(task).collect())
    }

    /// Hands `task` to the pool and returns immediately without waiting for
    /// it to finish, unlike [`TaskPool::submit`]. For work the caller has no
    /// result to join on — e.g. a compaction cascade triggered by a write
    /// that must not block on it.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::CancelToken;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn submit_runs_and_returns_result() {
        let pool = TaskPool::new(Concurrency::of(2));
        let result = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn bounded_pool_does_not_overflow_under_sequential_use() {
        let pool = TaskPool::bounded(Concurrency::of(1), 1);
        for _ in 0..10 {
            assert!(pool.submit(|| ()).is_ok());
        }
    }

    #[test]
    fn for_each_visits_every_item() {
        let pool = TaskPool::new(Concurrency::of(4));
        let items: Vec<i64> = (0..100).collect();
        let total = AtomicI64::new(0);
        pool.for_each(&items, |x| {
            total.fetch_add(*x, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(total.load(Ordering::Relaxed), (0..100).sum::<i64>());
    }

    #[test]
    fn for_each_short_circuits_on_cancel() {
        let pool = TaskPool::new(Concurrency::of(2));
        let token = CancelToken::new();
        token.cancel();
        let items = vec![1, 2, 3];
        let result = pool.for_each(&items, |_| {
            if token.is_cancelled() {
                Err(VangaError::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(VangaError::Cancelled)));
    }
}
