//! A minimal logging shim, thread-name-prefixed the way `toolbox.pr` printed
//! diagnostics in the original implementation. Kept deliberately thin: this
//! is where a consumer crate would swap in `log`/`tracing` without touching
//! call sites elsewhere in this crate.

/// Logs a line to stderr, prefixed with the current thread's name (or its
/// id if unnamed). Never panics and never propagates an error: logging is
/// a side channel, not part of this crate's control flow.
pub fn log(msg: &str) {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    eprintln!("[{name}] {msg}");
}

/// Like [`log`], but a no-op once [`crate::shutdown::is_shutting_down`] has
/// flipped. For daemon threads (reader/writer/acceptor/thread-pool loops)
/// whose ordinary errors during process exit are expected noise, not a
/// fault worth surfacing.
pub fn log_unless_shutting_down(msg: &str) {
    if !crate::shutdown::is_shutting_down() {
        log(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_does_not_panic() {
        log("a diagnostic line");
    }
}
