//! Process-wide "quiet shutdown" flag (SPEC_FULL §10.5).
//!
//! Reader, writer, acceptor, and thread-pool worker threads are daemons:
//! they keep running for as long as their socket or queue is alive, which
//! can outlast `main` during process exit. Once `libc::atexit` fires, the
//! process is already tearing down streams and other globals those threads
//! might touch, so logging a noisy error at that point is misleading at
//! best. This flag is flipped once, at exit, so [`crate::logging::log`]
//! call sites that care can check [`is_shutting_down`] first and stay
//! quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);
static REGISTER: Once = Once::new();

extern "C" fn mark_shutting_down() {
    SHUTTING_DOWN.store(true, Ordering::SeqCst);
}

/// Arms the `atexit` hook that flips [`is_shutting_down`]. Idempotent and
/// cheap to call from every place a daemon thread is spawned; only the
/// first call actually registers anything.
pub fn register() {
    REGISTER.call_once(|| unsafe {
        libc::atexit(mark_shutting_down);
    });
}

/// True once the process has begun `atexit` teardown.
pub fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_shutting_down_by_default() {
        assert!(!is_shutting_down());
    }

    #[test]
    fn register_is_idempotent() {
        register();
        register();
    }
}
