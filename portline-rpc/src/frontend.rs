//! A handle to a callable exposed by the peer on the other end of a
//! [`Port`].
//!
//! Grounded on `rpc.py`'s `_ProxyFrontend`: a class-level shared mailbox
//! used for every call's reply correlation, a reserved reply id of `0`
//! meaning "fire-and-forget, don't wait", `encode` shortcutting to a
//! negative id when handed back to the same port it came from, and
//! `__del__` sending a best-effort `unref` (silently tolerating the port
//! having already stopped).

use crate::error::RpcError;
use crate::proxy::{backend, Callable};
use portline::{Mailbox, Port, ProxyPackage, Value};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

/// How long [`RemoteHandle::call`] waits for a reply before giving up.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

type ReplyMailbox = Mailbox<Result<Value, String>>;

static REPLIES: LazyLock<ReplyMailbox> = LazyLock::new(Mailbox::new);

/// A reference to a callable living on the other side of `port`, identified
/// by the `proxy_id` the peer's export list (or a prior call's return
/// value) assigned it.
pub struct RemoteHandle {
    port: Weak<Port>,
    proxy_id: i64,
    no_reply: bool,
    name: String,
}

impl RemoteHandle {
    pub fn new(port: &Arc<Port>, proxy_id: i64, no_reply: bool, name: impl Into<String>) -> Self {
        RemoteHandle {
            port: Arc::downgrade(port),
            proxy_id,
            no_reply,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the remote callable with `args`, blocking for a reply unless
    /// the peer registered this proxy `no_reply` (in which case the call
    /// returns `Ok(Value::Null)` as soon as the message is queued).
    pub fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_timeout(args, DEFAULT_CALL_TIMEOUT)
    }

    pub fn call_timeout(&self, args: Vec<Value>, timeout: Duration) -> Result<Value, RpcError> {
        let port = self.port.upgrade().ok_or(RpcError::PortClosed)?;
        call_remote(&port, self.proxy_id, self.no_reply, args, timeout)
    }

    /// Encodes this handle as a ready-to-embed [`Value`] argument for a
    /// call going out over `port` — the single-leaf case of spec.md §4.9's
    /// argument-tree encoding, for callers building `call`/`call_timeout`
    /// argument lists.
    pub fn encode_arg(&self, port: &Arc<Port>) -> Value {
        Value::Proxy(self.encode(port))
    }

    /// Encodes this handle for transmission over `port`. If `port` is the
    /// same port this handle already refers to, returns the negative-id
    /// shortcut so the peer recognizes the proxy as its own (spec.md
    /// §4.9). Otherwise this handle is registered as a new backend
    /// callable that simply forwards to the original remote, so a third
    /// party reachable via `port` can still call it — one extra hop
    /// instead of the teacher's reflective same-object shortcut.
    pub fn encode(&self, port: &Arc<Port>) -> ProxyPackage {
        if let Some(my_port) = self.port.upgrade() {
            if Arc::ptr_eq(&my_port, port) {
                return ProxyPackage {
                    proxy_id: -self.proxy_id,
                    no_reply: self.no_reply,
                };
            }
        }
        let forward_port = self.port.clone();
        let forward_id = self.proxy_id;
        let forward_no_reply = self.no_reply;
        let func: Callable = Arc::new(move |_receiving_port, args| {
            let Some(port) = forward_port.upgrade() else {
                return Err("forwarded proxy's original port is gone".to_owned());
            };
            call_remote(&port, forward_id, forward_no_reply, args, DEFAULT_CALL_TIMEOUT)
                .map_err(|e| e.to_string())
        });
        let id = backend().register(func, false);
        ProxyPackage { proxy_id: id, no_reply: self.no_reply }
    }
}

/// Decodes a [`ProxyPackage`] received as a message argument into a
/// callable handle on `port`. A negative `proxy_id` is the same-port
/// shortcut (spec.md §4.9): it still resolves to a handle on `port`,
/// trading the teacher's reflective short-circuit (return the original
/// local object directly) for a handle that happens to round-trip through
/// the same port it came from — see DESIGN.md.
pub fn decode_proxy(port: &Arc<Port>, pkg: ProxyPackage) -> RemoteHandle {
    RemoteHandle::new(port, pkg.proxy_id.abs(), pkg.no_reply, "")
}

/// Registers `func` as a local backend callable and wraps it as a
/// [`Value::Proxy`] argument — the "any other callable is freshly
/// registered as a local backend" case of spec.md §4.9, for a plain
/// closure rather than an existing [`RemoteHandle`].
pub fn encode_callback(func: Callable, no_reply: bool) -> Value {
    let id = backend().register(func, false);
    Value::Proxy(ProxyPackage { proxy_id: id, no_reply })
}

/// Applies spec.md §4.9's argument-tree encoding pass to a single outgoing
/// value, depth-first through `List`/`Map`. A frontend handle or a plain
/// callable is already turned into a `Value::Proxy` at the point the
/// caller builds `args` ([`RemoteHandle::encode_arg`], [`encode_callback`])
/// — Rust's static typing gives a live callable nowhere else to hide — so
/// this walk exists to visit every leaf the same way the decode side does,
/// not to transform `Proxy` packages that are already in final wire form.
fn encode_arg_tree(value: Value) -> Value {
    value.map_tree(&mut |v| v)
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if let Some(port) = self.port.upgrade() {
            let _ = port.send_tag("unref", vec![Value::Int(self.proxy_id)]);
        }
    }
}

/// Reserves a reply slot (unless `no_reply`), sends the `call` message,
/// and waits for the correlated `reply` — the logic shared by a direct
/// [`RemoteHandle::call`] and a forwarded call built by [`RemoteHandle::encode`].
pub(crate) fn call_remote(
    port: &Arc<Port>,
    proxy_id: i64,
    no_reply: bool,
    args: Vec<Value>,
    timeout: Duration,
) -> Result<Value, RpcError> {
    let args: Vec<Value> = args.into_iter().map(encode_arg_tree).collect();
    if no_reply {
        port.send_tag("call", vec![Value::Int(0), Value::Int(proxy_id), Value::List(args)])
            .map_err(|_| RpcError::PortClosed)?;
        return Ok(Value::Null);
    }
    let reply_id = REPLIES.reserve(None);
    if port
        .send_tag("call", vec![Value::Int(reply_id), Value::Int(proxy_id), Value::List(args)])
        .is_err()
    {
        REPLIES.cancel(reply_id);
        return Err(RpcError::PortClosed);
    }
    match REPLIES.wait(reply_id, Some(timeout)) {
        Some(Ok(value)) => Ok(value),
        Some(Err(msg)) => Err(RpcError::Remote(msg)),
        None => {
            REPLIES.cancel(reply_id);
            Err(RpcError::Timeout)
        }
    }
}

/// Posts a decoded `reply` message to whichever call is waiting on
/// `reply_id`. Called by [`crate::service::RpcCommonService`]'s `reply`
/// handler.
pub(crate) fn post_reply(reply_id: i64, result: Result<Value, String>) {
    // Not strict: the caller may have already timed out and canceled its
    // reservation by the time a late reply arrives.
    REPLIES.post(reply_id, result, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_preserved() {
        // RemoteHandle::new needs a live port to downgrade; exercised end
        // to end in portline-rpc/tests/rpc.rs instead of constructed here
        // in isolation.
        assert_eq!(DEFAULT_CALL_TIMEOUT, Duration::from_secs(120));
    }
}
