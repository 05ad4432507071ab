//! Error types for the transport layer.
//!
//! One enum per distinguishable failure mode (spec.md §7), `thiserror`-derived
//! in the style of `exfiltrate::bidirectional_proxy::Error`: a handful of
//! named variants with `#[error("...")]` messages rather than a single
//! type-erased error.


/// Errors raised by [`crate::socket::FramedSocket`] read/write primitives.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("recv timed out after {0:?}")]
    RecvTimeout(std::time::Duration),
    #[error("send timed out after {0:?}")]
    SendTimeout(std::time::Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while packing or unpacking a frame (spec.md §4.2, §7).
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Clean end-of-stream at a frame boundary: the peer is done sending.
    /// Not logged; delivered to the service as `DISCONNECTED`.
    #[error("no more data: peer finished sending")]
    NoMoreData,
    /// End-of-stream (or a send/recv timeout) in the middle of a frame.
    #[error("unexpected disconnection while reading a frame")]
    UnexpectedDisconnection,
    /// The declared frame length was outside `0 < N <= 16 MiB`.
    #[error("packed frame size {0} is out of bounds")]
    OversizeFrame(i64),
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// The maximum payload size in bytes a frame may declare (16 MiB).
pub const MAX_FRAME_BYTES: i64 = 16 * 1024 * 1024;

/// Errors surfaced by a [`crate::port::Port`]'s reader or writer thread.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("no more data: peer finished sending")]
    NoMoreData,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("pack error: {0}")]
    Pack(#[from] PackError),
    /// The reader unpacked this error after the writer had already captured
    /// a send failure; both are preserved rather than one overwriting the
    /// other (spec.md §9's send-error/reader-exception pairing, resolved as
    /// a structured cause chain — see DESIGN.md).
    #[error("{reader_error} (preceded by a failed send: {send_error})")]
    ReaderAfterSendFailure {
        send_error: std::sync::Arc<PortError>,
        reader_error: Box<PortError>,
    },
}

/// Raised by [`crate::queue::CancelableQueue::put`] once the queue has been
/// stopped.
#[derive(Debug, thiserror::Error)]
#[error("queue is already stopped")]
pub struct AlreadyStopped;

/// Errors from [`crate::connector::Connector`] when retry is disabled.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {addr}: {source}")]
    Failed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
