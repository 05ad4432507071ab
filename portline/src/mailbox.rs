//! A one-time, correlation-id-keyed rendezvous box: reserve a key, post a
//! value to it from any thread, and have the reserving thread wait for it.
//!
//! Grounded on `toolbox.py`'s `OnetimeMsgBox`, used there as the RPC
//! layer's reply-correlation mechanism (`_ProxyFrontend._mbox`). A slot
//! distinguishes "reserved but not yet posted" from "posted" so a posted
//! `None`/unit value is never confused with "nothing has arrived yet".

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

enum Slot<T> {
    Pending,
    Posted(T),
}

struct Inner<T> {
    slots: HashMap<i64, Slot<T>>,
}

/// A one-time mailbox keyed by caller-chosen or auto-assigned `i64` ids
/// (spec.md §4.8).
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    next_id: AtomicI64,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Mailbox {
            inner: Mutex::new(Inner { slots: HashMap::new() }),
            cond: Condvar::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Reserves a slot, returning its key. Pass `key` to reserve a specific
    /// id (e.g. one the caller already sent on the wire); pass `None` to
    /// have one assigned. Panics if `key` is already reserved (spec.md
    /// §4.8: "must be unused if supplied").
    pub fn reserve(&self, key: Option<i64>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let key = match key {
            Some(key) => {
                assert!(!inner.slots.contains_key(&key), "mailbox key {key} is already reserved");
                key
            }
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        inner.slots.insert(key, Slot::Pending);
        key
    }

    /// Posts `value` to `key`'s slot, waking anyone waiting on it. A no-op
    /// if the slot was never reserved or was already canceled/collected,
    /// unless `strict` is set, in which case that's a panic (spec.md §4.8).
    pub fn post(&self, key: i64, value: T, strict: bool) {
        let mut inner = self.inner.lock().unwrap();
        match inner.slots.get_mut(&key) {
            Some(slot) => {
                *slot = Slot::Posted(value);
                self.cond.notify_all();
            }
            None => assert!(!strict, "mailbox post(strict=true) to an unreserved key {key}"),
        }
    }

    /// Releases a reservation without waiting for a post, e.g. when a call
    /// is abandoned before a reply would ever arrive.
    pub fn cancel(&self, key: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.remove(&key);
    }

    /// Blocks until `key`'s slot is posted (or `timeout` elapses), then
    /// removes the slot and returns its value. Returns `None` on timeout or
    /// if `key` was never reserved.
    pub fn wait(&self, key: i64, timeout: Option<Duration>) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.slots.get(&key) {
                None => return None,
                Some(Slot::Posted(_)) => {
                    return match inner.slots.remove(&key) {
                        Some(Slot::Posted(v)) => Some(v),
                        _ => unreachable!(),
                    };
                }
                Some(Slot::Pending) => {}
            }
            match timeout {
                None => inner = self.cond.wait(inner).unwrap(),
                Some(tmo) => {
                    let (guard, result) = self.cond.wait_timeout(inner, tmo).unwrap();
                    inner = guard;
                    if result.timed_out() {
                        if let Some(Slot::Pending) = inner.slots.get(&key) {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn post_then_wait_returns_value() {
        let mbox: Mailbox<i64> = Mailbox::new();
        let key = mbox.reserve(None);
        mbox.post(key, 7, false);
        assert_eq!(mbox.wait(key, None), Some(7));
    }

    #[test]
    fn wait_times_out_when_never_posted() {
        let mbox: Mailbox<i64> = Mailbox::new();
        let key = mbox.reserve(None);
        assert_eq!(mbox.wait(key, Some(Duration::from_millis(20))), None);
    }

    #[test]
    fn wait_on_unreserved_key_returns_none_immediately() {
        let mbox: Mailbox<i64> = Mailbox::new();
        assert_eq!(mbox.wait(999, Some(Duration::from_millis(20))), None);
    }

    #[test]
    fn posted_unit_value_is_distinguishable_from_not_yet_posted() {
        let mbox: Mailbox<()> = Mailbox::new();
        let key = mbox.reserve(None);
        let mbox = Arc::new(mbox);
        let mbox2 = mbox.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            mbox2.post(key, (), false);
        });
        assert_eq!(mbox.wait(key, Some(Duration::from_secs(2))), Some(()));
        handle.join().unwrap();
    }

    #[test]
    fn reserve_with_explicit_key_is_honored() {
        let mbox: Mailbox<i64> = Mailbox::new();
        let key = mbox.reserve(Some(-5));
        assert_eq!(key, -5);
        mbox.post(-5, 1, false);
        assert_eq!(mbox.wait(-5, None), Some(1));
    }

    #[test]
    fn cancel_removes_reservation() {
        let mbox: Mailbox<i64> = Mailbox::new();
        let key = mbox.reserve(None);
        mbox.cancel(key);
        assert_eq!(mbox.wait(key, Some(Duration::from_millis(20))), None);
    }

    #[test]
    #[should_panic(expected = "already reserved")]
    fn reserve_rejects_a_colliding_explicit_key() {
        let mbox: Mailbox<i64> = Mailbox::new();
        mbox.reserve(Some(9));
        mbox.reserve(Some(9));
    }

    #[test]
    fn post_to_an_unreserved_key_is_a_no_op_when_not_strict() {
        let mbox: Mailbox<i64> = Mailbox::new();
        mbox.post(123, 1, false);
        assert_eq!(mbox.wait(123, Some(Duration::from_millis(20))), None);
    }

    #[test]
    #[should_panic(expected = "unreserved key")]
    fn strict_post_to_an_unreserved_key_panics() {
        let mbox: Mailbox<i64> = Mailbox::new();
        mbox.post(123, 1, true);
    }
}
