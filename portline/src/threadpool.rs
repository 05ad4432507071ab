//! A growing/decaying worker pool: spawns threads on backlog, lets idle
//! ones time out back down to a low-water mark.
//!
//! Grounded on `threadutil.py`'s `ThreadPool` (`thread_max=128`,
//! `thread_lwm=8` on the module singleton there): workers pull jobs from a
//! shared [`CancelableQueue`], a worker that times out idle above the
//! low-water mark exits, and a new worker is spawned on submission whenever
//! every existing worker looks busy.

use crate::error::AlreadyStopped;
use crate::logging::log_unless_shutting_down;
use crate::queue::{CancelableQueue, GetResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    queue: CancelableQueue<Job>,
    count: AtomicUsize,
    active: AtomicUsize,
    max: usize,
    lwm: usize,
    idle_timeout: Duration,
}

/// A pool of worker threads draining a shared job queue (spec.md §4.7).
pub struct ThreadPool {
    inner: Arc<Inner>,
}

impl ThreadPool {
    /// `max` caps the live worker count; `lwm` is the floor below which
    /// idle workers never decay; `idle_timeout` is how long an idle worker
    /// waits for a job above the low-water mark before exiting.
    pub fn new(max: usize, lwm: usize, idle_timeout: Duration) -> Self {
        crate::shutdown::register();
        let inner = Arc::new(Inner {
            queue: CancelableQueue::new(),
            count: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max,
            lwm,
            idle_timeout,
        });
        for _ in 0..lwm {
            spawn_worker(&inner);
        }
        ThreadPool { inner }
    }

    /// Submits `job` for execution on a worker thread. Grows the pool (up
    /// to `max`) if every current worker looks busy.
    pub fn queue(&self, job: impl FnOnce() + Send + 'static) -> Result<(), AlreadyStopped> {
        self.inner.queue.put(Box::new(job))?;
        let count = self.inner.count.load(Ordering::SeqCst);
        let active = self.inner.active.load(Ordering::SeqCst);
        if active >= count && count < self.inner.max {
            spawn_worker(&self.inner);
        }
        Ok(())
    }

    /// Stops accepting new jobs. If `soon`, queued-but-not-started jobs are
    /// dropped; otherwise workers drain the backlog before exiting.
    pub fn stop(&self, soon: bool) {
        self.inner.queue.stop(soon);
    }

    pub fn worker_count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }
}

fn spawn_worker(inner: &Arc<Inner>) {
    inner.count.fetch_add(1, Ordering::SeqCst);
    let inner = inner.clone();
    let name = format!("portline-pool-{}", inner.count.load(Ordering::SeqCst));
    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        worker_loop(&inner);
    });
    if spawned.is_err() {
        log_unless_shutting_down("threadpool: failed to spawn worker thread");
        inner.count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(inner: &Arc<Inner>) {
    loop {
        match inner.queue.get(Some(inner.idle_timeout)) {
            GetResult::Value(job) => {
                inner.active.fetch_add(1, Ordering::SeqCst);
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    log_unless_shutting_down("threadpool: worker job panicked");
                }
                inner.active.fetch_sub(1, Ordering::SeqCst);
            }
            GetResult::Timeout => {
                if inner.count.load(Ordering::SeqCst) > inner.lwm {
                    inner.count.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            }
            GetResult::Stopped => {
                inner.count.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn queued_job_runs() {
        let pool = ThreadPool::new(4, 1, Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        pool.queue(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn pool_grows_under_backlog_and_decays_back_to_lwm() {
        let pool = ThreadPool::new(4, 1, Duration::from_millis(30));
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.queue(move || {
                std::thread::sleep(Duration::from_millis(100));
                tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn stop_soon_prevents_further_jobs_from_running() {
        let pool = ThreadPool::new(2, 1, Duration::from_millis(50));
        pool.stop(true);
        assert!(pool.queue(|| {}).is_err());
    }
}
