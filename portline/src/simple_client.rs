//! A blocking, no-background-threads client: connect, send, receive, close.
//!
//! Grounded on `ipc.py`'s `SimpleClient` (a supplemented feature, spec.md
//! §10.5): unlike [`crate::connector::Connector`]/[`crate::port::Port`],
//! this type never spawns reader/writer threads — every call blocks the
//! caller directly, which is the right fit for short-lived request/response
//! exchanges that don't need a standing connection.

use crate::error::{PackError, SocketError};
use crate::packer::{recv_frame, send_frame, Message, Packer};
use crate::socket::{Address, FramedSocket};
use std::sync::Arc;
use std::time::Duration;

/// A blocking, single-threaded client connection (spec.md §10.5).
pub struct SimpleClient {
    socket: FramedSocket,
    packer: Arc<dyn Packer>,
}

impl SimpleClient {
    pub fn connect(addr: &Address, packer: Arc<dyn Packer>, connect_timeout: Option<Duration>) -> Result<Self, SocketError> {
        let socket = FramedSocket::connect(addr, connect_timeout)?;
        Ok(SimpleClient { socket, packer })
    }

    /// Encodes and sends one message, blocking until it's fully written.
    pub fn send(&mut self, msg: &Message) -> Result<(), PackError> {
        let bytes = self.packer.encode(msg)?;
        send_frame(&mut self.socket, &bytes)
    }

    /// Blocks for and decodes one message.
    pub fn recv(&mut self) -> Result<Message, PackError> {
        let bytes = recv_frame(&mut self.socket)?;
        self.packer.decode(&bytes)
    }

    /// Sends `msg` and blocks for the single reply (spec.md §10.5's
    /// request/response convenience).
    pub fn call(&mut self, msg: &Message) -> Result<Message, PackError> {
        self.send(msg)?;
        self.recv()
    }

    pub fn close(&self) {
        self.socket.shut_read();
        self.socket.shut_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::JsonPacker;
    use crate::socket::Listener;
    use crate::value::Value;

    #[test]
    fn call_sends_and_receives_one_message() {
        let listener = FramedSocket::listen(&Address::parse("127.0.0.1:0"), 1).unwrap();
        let port = match &listener {
            Listener::Tcp(l) => l.local_addr().unwrap().port(),
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let server_thread = std::thread::spawn(move || {
            let mut server = listener.accept().unwrap();
            let bytes = crate::packer::recv_frame(&mut server).unwrap();
            let packer = JsonPacker;
            let msg = packer.decode(&bytes).unwrap();
            assert_eq!(msg, vec![Value::Str("ping".into())]);
            let reply = packer.encode(&vec![Value::Str("pong".into())]).unwrap();
            crate::packer::send_frame(&mut server, &reply).unwrap();
        });

        let addr = Address::parse(&format!("127.0.0.1:{port}"));
        let mut client = SimpleClient::connect(&addr, Arc::new(JsonPacker), None).unwrap();
        let reply = client.call(&vec![Value::Str("ping".into())]).unwrap();
        assert_eq!(reply, vec![Value::Str("pong".into())]);
        client.close();
        server_thread.join().unwrap();
    }
}
