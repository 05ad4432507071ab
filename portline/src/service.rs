//! The per-connection callback interface and the linked-port registry used
//! for broadcast.
//!
//! Grounded on `ipc.py`'s `ServiceBase`: four lifecycle hooks
//! (`handle_CONNECTED`/`handle_ACCEPTED`/`handle_DISCONNECTED`/
//! `handle_SOCKERROR`), a `call_handler` dispatch that falls through to
//! `handle_default` (there, `NotImplementedError`), and `link_port`/
//! `unlink_port`/`sendto_all` for fanning a message out to every service
//! sharing a registry. Per the Design Note in spec.md §9, Python's dynamic
//! `handle_<tag>` dispatch becomes a tagged match in
//! [`Service::handle_message`] rather than reflection.

use crate::error::PortError;
use crate::packer::Message;
use crate::port::Port;
use crate::value::Value;
use std::sync::{Arc, Mutex};

/// A lifecycle event delivered to a [`Service`] outside the tagged message
/// stream (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum Event {
    /// This port is the client side of a freshly established connection.
    Connected,
    /// This port is the server side of a freshly accepted connection.
    Accepted,
    /// The peer closed the connection cleanly.
    Disconnected,
    /// The socket failed; carries the error that ended the port's threads.
    SockError(Arc<PortError>),
}

/// Per-connection message and lifecycle handler.
///
/// A fresh `Service` is expected per connection (an [`crate::acceptor::Acceptor`]
/// constructs one per accept via a factory closure), matching
/// `ipc.py`'s `Acceptor._service_factory()` per-accept contract.
pub trait Service: Send + Sync {
    /// Dispatches a message already split into its tag and argument list.
    /// The default implementation calls [`Self::handle_default`] for every
    /// tag; override to match on `tag` and handle what you recognize,
    /// falling back to `handle_default` (or the trait's default, which
    /// panics) for anything else.
    fn handle_message(&self, port: &Arc<Port>, tag: &str, args: Vec<Value>) {
        self.handle_default(port, tag, args);
    }

    /// Called for any tag `handle_message` doesn't recognize. The base
    /// behavior matches `ServiceBase.handle_default`: treat an
    /// unrecognized tag as a programming error.
    fn handle_default(&self, _port: &Arc<Port>, tag: &str, _args: Vec<Value>) {
        panic!("no handler registered for message tag {tag:?}");
    }

    /// Fired once, before the reader loop starts, for a freshly connected
    /// or accepted port.
    fn handle_event(&self, _port: &Arc<Port>, _event: &Event) {}
}

/// Splits a wire [`Message`] into `(tag, args)`. The first element must be
/// a string; anything else is treated as malformed input from the peer.
pub fn split_message(mut msg: Message) -> Option<(String, Vec<Value>)> {
    if msg.is_empty() {
        return None;
    }
    let args = msg.split_off(1);
    match msg.into_iter().next() {
        Some(Value::Str(tag)) => Some((tag, args)),
        _ => None,
    }
}

/// Builds a wire [`Message`] from a tag and argument list.
pub fn build_message(tag: &str, mut args: Vec<Value>) -> Message {
    let mut msg = Vec::with_capacity(args.len() + 1);
    msg.push(Value::Str(tag.to_owned()));
    msg.append(&mut args);
    msg
}

/// A set of ports that can be addressed together, mirroring
/// `ServiceBase.link_port`/`unlink_port`/`sendto_all`.
#[derive(Default)]
pub struct PortRegistry {
    ports: Mutex<Vec<Arc<Port>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        PortRegistry { ports: Mutex::new(Vec::new()) }
    }

    pub fn link(&self, port: Arc<Port>) {
        self.ports.lock().unwrap().push(port);
    }

    pub fn unlink(&self, port: &Arc<Port>) {
        let mut ports = self.ports.lock().unwrap();
        ports.retain(|p| !Arc::ptr_eq(p, port));
    }

    /// Sends `tag`/`args` to every currently-linked port. Takes a snapshot
    /// of the membership under the lock and sends outside it, matching
    /// `sendto_all`'s `self.__ports[:]` copy: a concurrent `unlink` during
    /// the broadcast is not required to be observed atomically.
    pub fn broadcast(&self, tag: &str, args: Vec<Value>) {
        let snapshot: Vec<Arc<Port>> = self.ports.lock().unwrap().clone();
        for port in snapshot {
            let _ = port.send_tag(tag, args.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_build_message_roundtrip() {
        let msg = build_message("greet", vec![Value::Str("world".into())]);
        let (tag, args) = split_message(msg).unwrap();
        assert_eq!(tag, "greet");
        assert_eq!(args, vec![Value::Str("world".into())]);
    }

    #[test]
    fn split_message_rejects_empty_or_non_string_tag() {
        assert!(split_message(vec![]).is_none());
        assert!(split_message(vec![Value::Int(1)]).is_none());
    }
}
