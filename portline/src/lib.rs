//! Length-prefixed message IPC: framed sockets, pluggable packers, and a
//! reader/writer-thread "port" model for bidirectional, tag-dispatched
//! messaging between two processes.
//!
//! See the crate's top-level modules for the pieces: [`socket`] for the
//! raw framing, [`packer`] for the wire formats built on it, [`service`]
//! and [`port`] for the connection model, and [`connector`]/[`acceptor`]
//! for the client/server wiring on top of that.

pub mod acceptor;
pub mod cancel;
pub mod config;
pub mod connector;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod packer;
pub mod port;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod simple_client;
pub mod socket;
pub mod threadpool;
pub mod value;

pub use acceptor::Acceptor;
pub use connector::Connector;
pub use mailbox::Mailbox;
pub use packer::{BinaryPacker, JsonPacker, Message, Packer};
pub use port::Port;
pub use queue::{CancelableQueue, GetResult};
pub use service::{Event, PortRegistry, Service};
pub use simple_client::SimpleClient;
pub use socket::{Address, FramedSocket};
pub use threadpool::ThreadPool;
pub use value::{ProxyPackage, Value};
