//src/pool.rs

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::Arc;

struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Pending {
    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

struct FinishGuard(Arc<Pending>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Fixed-size worker pool with a bounded backlog.
///
/// When `threads + queue_capacity` tasks are already outstanding the
/// submitting thread runs the task itself.
pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
    capacity: usize,
    pending: Arc<Pending>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_capacity: usize) -> Result<Self, ThreadPoolBuildError> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kmerclass-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            threads,
            capacity: threads + queue_capacity,
            pending: Arc::new(Pending {
                count: Mutex::new(0),
                drained: Condvar::new(),
            }),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Tasks submitted and not yet finished.
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut count = self.pending.count.lock();
            *count += 1;
            if *count > self.capacity {
                drop(count);
                let _guard = FinishGuard(Arc::clone(&self.pending));
                task();
                return;
            }
        }
        let guard = FinishGuard(Arc::clone(&self.pending));
        self.pool.spawn(move || {
            let _guard = guard;
            task();
        });
    }

    /// Block until every submitted task has finished.
    pub fn join(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.drained.wait(&mut count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_every_task() {
        let pool = WorkerPool::new(3, 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_caller_runs_when_full() {
        let pool = WorkerPool::new(1, 0).unwrap();
        let caller = thread::current().id();
        let ran_on_caller = Arc::new(AtomicUsize::new(0));

        // occupies the only worker
        pool.execute(|| thread::sleep(Duration::from_millis(200)));

        let flag = Arc::clone(&ran_on_caller);
        pool.execute(move || {
            if thread::current().id() == caller {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(ran_on_caller.load(Ordering::SeqCst), 1);
        pool.join();
    }

    #[test]
    fn test_join_on_idle_pool_returns() {
        let pool = WorkerPool::new(2, 4).unwrap();
        pool.join();
        assert_eq!(pool.threads(), 2);
    }
}
