//! The server half of the transport: bind, accept, and spin up a fresh
//! [`Service`] + [`Port`] per connection.
//!
//! Grounded on `ipc.py`'s `Acceptor`: a per-accept `Service` and `Packer`
//! built from factories so connections never share mutable state, and an
//! accept loop that logs and drops a bad connection rather than taking
//! the whole listener down.

use crate::cancel::CancelToken;
use crate::logging::log_unless_shutting_down;
use crate::packer::Packer;
use crate::port::Port;
use crate::service::{Event, Service};
use crate::socket::{Address, FramedSocket, Listener};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Listens on an [`Address`] and spawns one [`Port`] per accepted
/// connection, each with its own service and packer instance (spec.md
/// §4.5).
pub struct Acceptor {
    listener: Listener,
    addr: Address,
    bound_addr: String,
    packer_factory: Box<dyn Fn() -> Arc<dyn Packer> + Send + Sync>,
    service_factory: Box<dyn Fn() -> Arc<dyn Service> + Send + Sync>,
    cancel: CancelToken,
}

impl Acceptor {
    pub fn bind(
        addr: Address,
        backlog: i32,
        packer_factory: impl Fn() -> Arc<dyn Packer> + Send + Sync + 'static,
        service_factory: impl Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    ) -> std::io::Result<Self> {
        crate::shutdown::register();
        let listener = FramedSocket::listen(&addr, backlog).map_err(std::io::Error::other)?;
        let bound_addr = listener.local_addr_display();
        Ok(Acceptor {
            listener,
            addr,
            bound_addr,
            packer_factory: Box::new(packer_factory),
            service_factory: Box::new(service_factory),
            cancel: CancelToken::new(),
        })
    }

    /// Runs the accept loop in the calling thread until [`Self::stop`] is
    /// called. Each accepted connection gets its own [`Port`], started with
    /// [`Event::Accepted`] and handed to the caller via `on_port`.
    pub fn run(&self, on_port: impl Fn(Arc<Port>)) {
        loop {
            if self.cancel.is_canceled() {
                return;
            }
            match self.listener.accept() {
                Ok(socket) => {
                    let packer = (self.packer_factory)();
                    let service = (self.service_factory)();
                    let port = Port::start(socket, packer, service, Event::Accepted);
                    on_port(port);
                }
                Err(e) => {
                    if self.cancel.is_canceled() {
                        return;
                    }
                    log_unless_shutting_down(&format!("acceptor: accept() on {} failed: {e}", self.addr));
                }
            }
        }
    }

    /// Spawns [`Self::run`] on a background thread.
    pub fn spawn(self: Arc<Self>, on_port: impl Fn(Arc<Port>) + Send + 'static) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("Acceptor".to_owned())
            .spawn(move || self.run(on_port))
            .expect("failed to spawn acceptor thread")
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn local_addr_display(&self) -> String {
        self.bound_addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::JsonPacker;
    use crate::socket::FramedSocket;
    use crate::value::Value;
    use std::sync::mpsc;

    struct EchoService;
    impl Service for EchoService {
        fn handle_message(&self, _port: &Arc<Port>, _tag: &str, _args: Vec<Value>) {}
    }

    #[test]
    fn accepts_one_connection_and_invokes_callback() {
        let acceptor = Acceptor::bind(
            Address::parse("127.0.0.1:0"),
            4,
            || Arc::new(JsonPacker) as Arc<dyn Packer>,
            || Arc::new(EchoService) as Arc<dyn Service>,
        )
        .unwrap();
        let acceptor = Arc::new(acceptor);
        let port_for_addr = match &acceptor.listener {
            Listener::Tcp(l) => l.local_addr().unwrap().port(),
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let (tx, rx) = mpsc::channel();
        let _handle = acceptor.clone().spawn(move |port| {
            tx.send(port).unwrap();
        });
        let addr = Address::parse(&format!("127.0.0.1:{port_for_addr}"));
        let _client = FramedSocket::connect(&addr, None).unwrap();
        let accepted = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        accepted.close();
        acceptor.stop();
    }
}
