//! Cooperative cancellation for long-running loops (connector retry,
//! acceptor accept loop).
//!
//! Grounded on `threadutil.py`'s `Thread._canceling`/`test_cancel`: a flag a
//! caller can set from another thread, checked at loop boundaries rather
//! than delivered as an asynchronous interrupt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raised by [`CancelToken::check`] once [`CancelToken::cancel`] has been
/// called.
#[derive(Debug, thiserror::Error)]
#[error("operation was canceled")]
pub struct Canceled;

/// A cooperative cancel flag, cloneable and shareable across threads.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Canceled)` if [`Self::cancel`] has been called.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_canceled() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.check().is_err());
    }
}
