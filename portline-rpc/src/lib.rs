//! A bidirectional, symmetric RPC layer on top of `portline`: either side
//! of a connection can export callables and call the other side's, replies
//! correlate by id through a shared mailbox, and proxies can be passed as
//! call arguments and forwarded across a third connection.

pub mod convenience;
pub mod error;
pub mod frontend;
pub mod proxy;
pub mod service;

pub use convenience::{serve, Client, RpcServerHandle};
pub use error::RpcError;
pub use frontend::{decode_proxy, encode_callback, RemoteHandle, DEFAULT_CALL_TIMEOUT};
pub use proxy::{backend, BackendRegistry, Callable};
pub use service::{call_by_id, dispatch_common, rpc_server_factory, Export, Proxies, ProxyHandle, RpcClient, RpcServer};
