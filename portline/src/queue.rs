//! A FIFO queue with blocking, timed `get`, and a `stop` that can drain
//! pending items or discard them on the spot.
//!
//! Grounded on `threadutil.py`'s `Queue`: puts after `stop()` raise
//! [`AlreadyStopped`](crate::error::AlreadyStopped); `get` distinguishes
//! "woke up empty because of a timeout" from "woke up empty because the
//! queue stopped" instead of collapsing both into `None`.

use crate::error::AlreadyStopped;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Outcome of [`CancelableQueue::get`].
pub enum GetResult<T> {
    Value(T),
    /// The timeout elapsed with nothing to return.
    Timeout,
    /// The queue is stopped and drained; no more values will ever arrive.
    Stopped,
}

/// A cancelable, blocking FIFO queue (spec.md §4.6).
pub struct CancelableQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> Default for CancelableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CancelableQueue<T> {
    pub fn new() -> Self {
        CancelableQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends `value`. Fails if [`Self::stop`] was already called.
    pub fn put(&self, value: T) -> Result<(), AlreadyStopped> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(AlreadyStopped);
        }
        inner.items.push_back(value);
        self.cond.notify_one();
        Ok(())
    }

    /// Blocks for up to `timeout` (or forever, if `None`) for an item.
    pub fn get(&self, timeout: Option<Duration>) -> GetResult<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(v) = inner.items.pop_front() {
                return GetResult::Value(v);
            }
            if inner.stopped {
                return GetResult::Stopped;
            }
            match timeout {
                None => inner = self.cond.wait(inner).unwrap(),
                Some(tmo) => {
                    let (guard, result) = self.cond.wait_timeout(inner, tmo).unwrap();
                    inner = guard;
                    if result.timed_out() && inner.items.is_empty() && !inner.stopped {
                        return GetResult::Timeout;
                    }
                }
            }
        }
    }

    /// Stops the queue. New puts fail with [`AlreadyStopped`]. If `soon`,
    /// pending items are discarded immediately and any blocked `get` wakes
    /// with [`GetResult::Stopped`]; otherwise pending items still drain
    /// through `get` before `Stopped` shows up.
    pub fn stop(&self, soon: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        if soon {
            inner.items.clear();
        }
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn put_then_get_returns_value() {
        let q: CancelableQueue<i32> = CancelableQueue::new();
        q.put(1).unwrap();
        match q.get(None) {
            GetResult::Value(v) => assert_eq!(v, 1),
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn get_times_out_when_empty() {
        let q: CancelableQueue<i32> = CancelableQueue::new();
        match q.get(Some(Duration::from_millis(20))) {
            GetResult::Timeout => {}
            _ => panic!("expected timeout"),
        }
    }

    #[test]
    fn put_after_stop_fails() {
        let q: CancelableQueue<i32> = CancelableQueue::new();
        q.stop(false);
        assert!(q.put(1).is_err());
    }

    #[test]
    fn stop_soon_discards_pending_and_wakes_blocked_get() {
        let q: CancelableQueue<i32> = CancelableQueue::new();
        q.put(1).unwrap();
        q.put(2).unwrap();
        q.stop(true);
        assert!(q.is_empty());
        match q.get(None) {
            GetResult::Stopped => {}
            _ => panic!("expected stopped"),
        }
    }

    #[test]
    fn stop_without_soon_drains_pending_items_first() {
        let q: CancelableQueue<i32> = CancelableQueue::new();
        q.put(1).unwrap();
        q.stop(false);
        match q.get(None) {
            GetResult::Value(v) => assert_eq!(v, 1),
            _ => panic!("expected the drained value before Stopped"),
        }
        match q.get(None) {
            GetResult::Stopped => {}
            _ => panic!("expected stopped after drain"),
        }
    }

    #[test]
    fn blocked_get_wakes_on_put_from_another_thread() {
        let q = Arc::new(CancelableQueue::<i32>::new());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.put(99).unwrap();
        });
        match q.get(Some(Duration::from_secs(2))) {
            GetResult::Value(v) => assert_eq!(v, 99),
            _ => panic!("expected value delivered from other thread"),
        }
        handle.join().unwrap();
    }
}
