//! The `Service` implementations that turn a raw [`Port`] into an RPC
//! endpoint: dispatching `call`/`reply`/`unref`, sending an export list on
//! accept, and building a proxy namespace from one on connect.
//!
//! Grounded on `rpc.py`'s `_RpcCommon`/`_RpcServer`/`_RpcClient`:
//! `handle_call`/`handle_reply`/`handle_unref` shared by both ends,
//! `handle_ACCEPTED` sending `['register', self._exports]` and firing
//! `on_connection`, `handle_DISCONNECTED` firing `on_disconnection`, and
//! `handle_register` building a dynamically-named proxy object that a
//! condition-variable-gated `.proxy` property blocks on.

use crate::frontend::{call_remote, post_reply, RemoteHandle};
use crate::proxy::{backend, Callable};
use portline::{Event, Port, ProxyPackage, Service, Value};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One callable this process exposes to whoever connects, mirroring a
/// `rpc.py` `@_RpcServer.export`-decorated method.
pub struct Export {
    pub name: String,
    pub func: Callable,
    /// Dispatched inline rather than on the shared pool (`_RPC_QUICK`).
    pub quick: bool,
    /// The caller gets no reply and doesn't wait for one (`_RPC_NOREPL`).
    pub no_reply: bool,
}

impl Export {
    pub fn new(name: impl Into<String>, func: Callable) -> Self {
        Export { name: name.into(), func, quick: false, no_reply: false }
    }

    pub fn quick(mut self) -> Self {
        self.quick = true;
        self
    }

    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }
}

/// Dispatches the three tags both server and client services share
/// (spec.md §4.9): a peer invoking one of our exports, a reply to one of
/// our outstanding calls, and the peer releasing a proxy we gave it.
pub fn dispatch_common(port: &Arc<Port>, tag: &str, args: Vec<Value>) {
    match tag {
        "call" => handle_call(port, args),
        "reply" => handle_reply(args),
        "unref" => handle_unref(args),
        other => portline::logging::log(&format!("rpc: ignoring unrecognized tag {other:?}")),
    }
}

fn handle_call(port: &Arc<Port>, args: Vec<Value>) {
    let mut it = args.into_iter();
    let (Some(reply_id), Some(proxy_id), Some(call_args)) = (
        it.next().and_then(|v| v.as_int()),
        it.next().and_then(|v| v.as_int()),
        it.next().and_then(|v| v.as_list().map(|s| s.to_vec())),
    ) else {
        portline::logging::log("rpc: malformed call message, dropping");
        return;
    };

    let call_args: Vec<Value> = call_args.into_iter().map(decode_arg_tree).collect();

    let reply_port = port.clone();
    let found = backend().dispatch(proxy_id, port.clone(), call_args, move |result| {
        if reply_id == 0 {
            return;
        }
        let reply_args = match result {
            Ok(v) => vec![Value::Int(reply_id), Value::Bool(true), v],
            Err(e) => vec![Value::Int(reply_id), Value::Bool(false), Value::Str(e)],
        };
        let _ = reply_port.send_tag("reply", reply_args);
    });

    if !found && reply_id != 0 {
        let _ = port.send_tag(
            "reply",
            vec![
                Value::Int(reply_id),
                Value::Bool(false),
                Value::Str(format!("no such proxy {proxy_id}")),
            ],
        );
    }
}

/// Applies spec.md §4.9's argument-tree decoding pass to a single incoming
/// value, depth-first through `List`/`Map`. A negative `Proxy` id is the
/// same-port shortcut ("this is your own function, handed back to you");
/// normalizing it to its positive form here means an exported handler can
/// hand any `Proxy` leaf it finds straight to [`crate::decode_proxy`]
/// without separately accounting for which side minted the id.
fn decode_arg_tree(value: Value) -> Value {
    value.map_tree(&mut |v| match v {
        Value::Proxy(pkg) => Value::Proxy(ProxyPackage { proxy_id: pkg.proxy_id.abs(), ..pkg }),
        other => other,
    })
}

fn handle_reply(args: Vec<Value>) {
    let mut it = args.into_iter();
    let (Some(reply_id), Some(ok), Some(value)) = (it.next().and_then(|v| v.as_int()), it.next(), it.next()) else {
        portline::logging::log("rpc: malformed reply message, dropping");
        return;
    };
    let ok = matches!(ok, Value::Bool(true));
    let result = if ok {
        Ok(value)
    } else {
        Err(value.as_str().map(str::to_owned).unwrap_or_else(|| format!("{value:?}")))
    };
    post_reply(reply_id, result);
}

fn handle_unref(args: Vec<Value>) {
    if let Some(id) = args.into_iter().next().and_then(|v| v.as_int()) {
        backend().unref(id);
    }
}

/// Builds the `register` payload for `exports`, each freshly registered in
/// the backend table (one registration per accepted connection, matching
/// `_RpcServer.handle_ACCEPTED` building `self._exports` per instance).
fn build_register_message(exports: &[Export]) -> Value {
    let entries = exports
        .iter()
        .map(|e| {
            let id = backend().register(e.func.clone(), e.quick);
            Value::List(vec![Value::Int(id), Value::Str(e.name.clone()), Value::Bool(e.no_reply)])
        })
        .collect();
    Value::List(entries)
}

/// The server side of an RPC connection: exposes `exports` to whoever
/// connects (spec.md §4.9).
pub struct RpcServer {
    exports: Arc<Vec<Export>>,
    on_connection: Option<Arc<dyn Fn(&Arc<Port>) + Send + Sync>>,
    on_disconnection: Option<Arc<dyn Fn(&Arc<Port>) + Send + Sync>>,
}

impl RpcServer {
    pub fn new(exports: Vec<Export>) -> Self {
        RpcServer { exports: Arc::new(exports), on_connection: None, on_disconnection: None }
    }

    pub fn with_on_connection(mut self, f: impl Fn(&Arc<Port>) + Send + Sync + 'static) -> Self {
        self.on_connection = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnection(mut self, f: impl Fn(&Arc<Port>) + Send + Sync + 'static) -> Self {
        self.on_disconnection = Some(Arc::new(f));
        self
    }
}

impl Service for RpcServer {
    fn handle_event(&self, port: &Arc<Port>, event: &Event) {
        match event {
            Event::Accepted => {
                let register = build_register_message(&self.exports);
                let _ = port.send_tag("register", vec![register]);
                if let Some(cb) = &self.on_connection {
                    cb(port);
                }
            }
            Event::Disconnected | Event::SockError(_) => {
                if let Some(cb) = &self.on_disconnection {
                    cb(port);
                }
            }
            Event::Connected => {}
        }
    }

    fn handle_message(&self, port: &Arc<Port>, tag: &str, args: Vec<Value>) {
        dispatch_common(port, tag, args);
    }
}

/// A factory that builds a fresh [`RpcServer`] (and its export list) per
/// accepted connection, for use as an [`portline::Acceptor`] service
/// factory.
pub fn rpc_server_factory(
    exports_factory: impl Fn() -> Vec<Export> + Send + Sync + 'static,
) -> impl Fn() -> Arc<dyn Service> + Send + Sync {
    move || Arc::new(RpcServer::new(exports_factory())) as Arc<dyn Service>
}

/// The set of remote callables a [`RpcClient`] learned about from the
/// peer's `register` message, keyed by export name.
#[derive(Default)]
pub struct Proxies {
    handles: HashMap<String, Arc<RemoteHandle>>,
}

impl Proxies {
    pub fn get(&self, name: &str) -> Option<&Arc<RemoteHandle>> {
        self.handles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }
}

struct ProxyCell {
    proxies: Mutex<Option<Arc<Proxies>>>,
    cond: Condvar,
}

/// The client side of an RPC connection: waits for the peer's `register`
/// message and exposes the resulting [`Proxies`] through a blocking
/// accessor, mirroring `_RpcClient`'s condition-variable-gated `.proxy`
/// property.
pub struct RpcClient {
    cell: Arc<ProxyCell>,
    on_connection: Option<Arc<dyn Fn(&Arc<Port>) + Send + Sync>>,
    on_disconnection: Option<Arc<dyn Fn(&Arc<Port>) + Send + Sync>>,
}

impl RpcClient {
    pub fn new() -> Self {
        RpcClient {
            cell: Arc::new(ProxyCell { proxies: Mutex::new(None), cond: Condvar::new() }),
            on_connection: None,
            on_disconnection: None,
        }
    }

    pub fn with_on_connection(mut self, f: impl Fn(&Arc<Port>) + Send + Sync + 'static) -> Self {
        self.on_connection = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnection(mut self, f: impl Fn(&Arc<Port>) + Send + Sync + 'static) -> Self {
        self.on_disconnection = Some(Arc::new(f));
        self
    }

    /// A handle that can fetch [`Proxies`] once the peer's `register`
    /// message arrives, independent of the `RpcClient` itself (which is
    /// owned by the port's service slot).
    pub fn proxy_handle(&self) -> ProxyHandle {
        ProxyHandle { cell: self.cell.clone() }
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for RpcClient {
    fn handle_event(&self, port: &Arc<Port>, event: &Event) {
        match event {
            Event::Connected => {
                if let Some(cb) = &self.on_connection {
                    cb(port);
                }
            }
            Event::Disconnected | Event::SockError(_) => {
                if let Some(cb) = &self.on_disconnection {
                    cb(port);
                }
            }
            Event::Accepted => {}
        }
    }

    fn handle_message(&self, port: &Arc<Port>, tag: &str, args: Vec<Value>) {
        if tag == "register" {
            let proxies = decode_register(port, args);
            *self.cell.proxies.lock().unwrap() = Some(Arc::new(proxies));
            self.cell.cond.notify_all();
            return;
        }
        dispatch_common(port, tag, args);
    }
}

fn decode_register(port: &Arc<Port>, args: Vec<Value>) -> Proxies {
    let mut handles = HashMap::new();
    if let Some(Value::List(entries)) = args.into_iter().next() {
        for entry in entries {
            if let Value::List(fields) = entry {
                let mut it = fields.into_iter();
                if let (Some(id), Some(Value::Str(name)), Some(Value::Bool(no_reply))) =
                    (it.next().and_then(|v| v.as_int()), it.next(), it.next())
                {
                    handles.insert(name.clone(), Arc::new(RemoteHandle::new(port, id, no_reply, name)));
                }
            }
        }
    }
    Proxies { handles }
}

/// A cloneable accessor for the [`Proxies`] an [`RpcClient`] eventually
/// learns about.
#[derive(Clone)]
pub struct ProxyHandle {
    cell: Arc<ProxyCell>,
}

impl ProxyHandle {
    /// Blocks up to `timeout` for the peer's `register` message to have
    /// arrived, returning the resulting [`Proxies`].
    pub fn wait(&self, timeout: Duration) -> Option<Arc<Proxies>> {
        let mut guard = self.cell.proxies.lock().unwrap();
        if guard.is_some() {
            return guard.clone();
        }
        let (guard2, _) = self.cell.cond.wait_timeout_while(guard, timeout, |p| p.is_none()).unwrap();
        guard = guard2;
        guard.clone()
    }
}

// Re-exported so call sites building forwarded proxies don't need to reach
// into `crate::frontend` directly.
pub use crate::frontend::decode_proxy;

/// Forwards a call identified only by `(port, proxy_id, no_reply)` without
/// requiring a [`RemoteHandle`] — used when decoding a proxy argument whose
/// handle hasn't been materialized.
pub fn call_by_id(port: &Arc<Port>, proxy_id: i64, no_reply: bool, args: Vec<Value>) -> Result<Value, crate::error::RpcError> {
    call_remote(port, proxy_id, no_reply, args, crate::frontend::DEFAULT_CALL_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_builder_sets_flags() {
        let export = Export::new("echo", Arc::new(|_p, args| Ok(args.into_iter().next().unwrap())))
            .quick()
            .no_reply();
        assert!(export.quick);
        assert!(export.no_reply);
        assert_eq!(export.name, "echo");
    }
}
