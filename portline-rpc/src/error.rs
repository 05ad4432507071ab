//! RPC-layer error types.
//!
//! Grounded on spec.md §7's RPC-specific kinds: a missing registry entry or
//! a panicking handler turn into a failure reply sent back to the caller,
//! never a torn-down port; only the call itself fails.

/// The outcome of a remote call that didn't simply return a value.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer's registry had no entry for the proxy id called — it was
    /// never exported, or was already [`crate::frontend::RemoteHandle`]-dropped and unreffed.
    #[error("remote proxy {0} is not registered")]
    NoSuchProxy(i64),
    /// The remote handler ran and raised/panicked; carries its message.
    #[error("remote call failed: {0}")]
    Remote(String),
    /// The call was sent `no_reply` (fire-and-forget); there is no value to
    /// wait for.
    #[error("call was sent no_reply; there is no reply to wait for")]
    NoReplyExpected,
    /// The connection went away before a reply arrived.
    #[error("port closed before a reply arrived")]
    PortClosed,
    /// Waiting for a reply exceeded the call's timeout.
    #[error("timed out waiting for a reply")]
    Timeout,
    /// A value arrived on the wire that didn't match the shape an RPC
    /// message requires (e.g. `call` with the wrong argument count).
    #[error("malformed RPC message: {0}")]
    Malformed(String),
}
