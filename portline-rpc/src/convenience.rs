//! Top-level convenience wrappers: start a server in one call, or connect
//! a client and block for its proxy namespace.
//!
//! Grounded on `rpc.py`'s module-level `server(addr, funcs_list, ...)`
//! function and its `client` class (a supplemented feature, spec.md
//! §10.5's "dynamic-dispatch ergonomics" exclusion applies to the
//! attribute-sugar mechanism, not to the connect/wait convenience itself).

use crate::error::RpcError;
use crate::service::{rpc_server_factory, Export, Proxies, RpcClient};
use portline::{Acceptor, Address, Connector, JsonPacker, Packer, Port, Service};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A running RPC server (spec.md §10.5).
pub struct RpcServerHandle {
    acceptor: Arc<Acceptor>,
    thread: Option<JoinHandle<()>>,
}

impl RpcServerHandle {
    pub fn stop(&self) {
        self.acceptor.stop();
    }

    pub fn local_addr(&self) -> String {
        self.acceptor.local_addr_display()
    }

    /// Blocks until the accept loop thread exits (after [`Self::stop`]).
    pub fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Binds `addr` and serves `exports_factory()`'s exports to every accepted
/// connection, matching `rpc.py`'s `server(addr, funcs_list, background=True)`.
pub fn serve(
    addr: Address,
    backlog: i32,
    exports_factory: impl Fn() -> Vec<Export> + Send + Sync + 'static,
) -> std::io::Result<RpcServerHandle> {
    let acceptor = Acceptor::bind(
        addr,
        backlog,
        || Arc::new(JsonPacker) as Arc<dyn Packer>,
        rpc_server_factory(exports_factory),
    )?;
    let acceptor = Arc::new(acceptor);
    let thread = acceptor.clone().spawn(|_port| {});
    Ok(RpcServerHandle { acceptor, thread: Some(thread) })
}

/// A client connection that blocks for the peer's exported proxy
/// namespace, matching `rpc.py`'s `client` class (there, lazily connected
/// on first attribute access; here, connected eagerly by [`Client::connect`]).
pub struct Client {
    port: Arc<Port>,
    proxies: crate::service::ProxyHandle,
}

impl Client {
    pub fn connect(addr: &Address) -> Result<Self, RpcError> {
        let rpc_client = Arc::new(RpcClient::new());
        let proxies = rpc_client.proxy_handle();
        let rpc_client_for_factory = rpc_client.clone();
        let connector = Connector::new(addr.clone(), Arc::new(JsonPacker), move || {
            rpc_client_for_factory.clone() as Arc<dyn Service>
        });
        let port = connector
            .connect_once()
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        Ok(Client { port, proxies })
    }

    /// Blocks up to `timeout` for the server's export list to arrive.
    pub fn proxies(&self, timeout: Duration) -> Option<Arc<Proxies>> {
        self.proxies.wait(timeout)
    }

    pub fn port(&self) -> &Arc<Port> {
        &self.port
    }

    pub fn close(&self) {
        self.port.close();
    }
}
