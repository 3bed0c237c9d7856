//! Fixed-size worker pool executing indexer and dirty jobs.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PendingCount {
    count: Mutex<usize>,
    idle: Condvar,
}

/// A pool of worker threads draining a shared task channel.
///
/// Tasks queue without bound; `wait_idle` observes the moment every
/// submitted task has finished.
pub struct WorkerPool {
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<PendingCount>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Task>();
        let pending = Arc::new(PendingCount {
            count: Mutex::new(0),
            idle: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|i| {
                let rx: Receiver<Task> = rx.clone();
                let pending = Arc::clone(&pending);
                thread::Builder::new()
                    .name(format!("ccdb-worker-{i}"))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            task();
                            let mut count = pending.count.lock().unwrap();
                            *count -= 1;
                            if *count == 0 {
                                pending.idle.notify_all();
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
            pending,
        }
    }

    /// Queue a task. Returns false after shutdown.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        {
            let mut count = self.pending.count.lock().unwrap();
            *count += 1;
        }
        if tx.send(Box::new(task)).is_err() {
            let mut count = self.pending.count.lock().unwrap();
            *count -= 1;
            return false;
        }
        true
    }

    /// A handle that can submit tasks from other threads.
    pub fn submitter(&self) -> PoolSubmitter {
        PoolSubmitter {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
        }
    }

    /// Block until every submitted task has completed, or the deadline
    /// passes. Returns whether the pool went idle.
    pub fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut count = self.pending.count.lock().unwrap();
        while *count != 0 {
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now())
            else {
                return false;
            };
            let (guard, _) = self.pending.idle.wait_timeout(count, remaining).unwrap();
            count = guard;
        }
        true
    }

    /// Stop accepting tasks, drain the queue and join the workers.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable submit-side handle to a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolSubmitter {
    tx: Option<Sender<Task>>,
    pending: Arc<PendingCount>,
}

impl PoolSubmitter {
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        {
            let mut count = self.pending.count.lock().unwrap();
            *count += 1;
        }
        if tx.send(Box::new(task)).is_err() {
            let mut count = self.pending.count.lock().unwrap();
            *count -= 1;
            return false;
        }
        true
    }

    /// Drop this handle's sender so the pool can wind down. Workers only
    /// exit once every submitter has disconnected.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn pool_runs_all_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            assert!(pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn shutdown_rejects_new_tasks() {
        let mut pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(!pool.submit(|| {}));
    }
}
