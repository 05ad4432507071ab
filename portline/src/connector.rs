//! The client half of the transport: connect (optionally retrying and
//! reconnecting), construct a fresh [`Service`] and [`Port`], and hand back
//! control.
//!
//! Grounded on `ipc.py`'s `Connector`: a fixed retry interval (5s there),
//! a traceback logged roughly once a minute rather than on every failed
//! attempt (`_retry_exc_n = 60 // 5`), and a `recover` mode that keeps
//! reconnecting using the same factories after a connection drops.

use crate::cancel::CancelToken;
use crate::error::ConnectError;
use crate::logging::log;
use crate::packer::Packer;
use crate::port::Port;
use crate::service::{Event, Service};
use crate::socket::{Address, FramedSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How many consecutive failed attempts pass between logged tracebacks,
/// at [`Connector::retry_interval`]'s default of 5s this is about once a
/// minute, matching `ipc.py`'s `_retry_exc_n`.
const LOG_EVERY_N_ATTEMPTS: u32 = 12;

/// Builds and, optionally, maintains a client connection (spec.md §4.5).
pub struct Connector {
    addr: Address,
    packer: Arc<dyn Packer>,
    service_factory: Box<dyn Fn() -> Arc<dyn Service> + Send + Sync>,
    pub retry_interval: Duration,
    pub connect_timeout: Option<Duration>,
    /// When `true`, [`Self::run`] reconnects (using the same factories)
    /// every time the port's threads exit, rather than returning.
    pub auto_reconnect: bool,
    cancel: CancelToken,
}

impl Connector {
    pub fn new(
        addr: Address,
        packer: Arc<dyn Packer>,
        service_factory: impl Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    ) -> Self {
        Connector {
            addr,
            packer,
            service_factory: Box::new(service_factory),
            retry_interval: Duration::from_secs(5),
            connect_timeout: None,
            auto_reconnect: false,
            cancel: CancelToken::new(),
        }
    }

    /// A single connect attempt: no retry, no reconnect. Returns the
    /// started [`Port`] on success.
    pub fn connect_once(&self) -> Result<Arc<Port>, ConnectError> {
        let socket = FramedSocket::connect(&self.addr, self.connect_timeout).map_err(|e| ConnectError::Failed {
            addr: self.addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
        let service = (self.service_factory)();
        Ok(Port::start(socket, self.packer.clone(), service, Event::Connected))
    }

    /// Connects, retrying every [`Self::retry_interval`] until it succeeds
    /// or [`Self::stop`] is called. Returns `None` if canceled before a
    /// connection was made.
    pub fn connect_retrying(&self) -> Option<Arc<Port>> {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_canceled() {
                return None;
            }
            match self.connect_once() {
                Ok(port) => return Some(port),
                Err(e) => {
                    attempt += 1;
                    if attempt % LOG_EVERY_N_ATTEMPTS == 1 {
                        log(&format!(
                            "connector: still failing to reach {} after {attempt} attempt(s): {e}",
                            self.addr
                        ));
                    }
                    std::thread::sleep(self.retry_interval);
                }
            }
        }
    }

    /// Runs the connect/reconnect loop in the calling thread, returning
    /// only once canceled (if [`Self::auto_reconnect`]) or after the first
    /// connection's threads exit (otherwise).
    pub fn run(&self) {
        loop {
            let Some(port) = self.connect_retrying() else { return };
            port.join();
            if !self.auto_reconnect || self.cancel.is_canceled() {
                return;
            }
        }
    }

    /// Spawns [`Self::run`] on a background thread.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("Connector".to_owned())
            .spawn(move || self.run())
            .expect("failed to spawn connector thread")
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::JsonPacker;
    use crate::value::Value;

    struct EchoService;
    impl Service for EchoService {
        fn handle_message(&self, _port: &Arc<Port>, _tag: &str, _args: Vec<Value>) {}
    }

    #[test]
    fn connect_once_fails_against_a_port_nothing_listens_on() {
        // Port 0 can never be dialed; connect_once should report a
        // ConnectError rather than hang or panic.
        let addr = Address::parse("127.0.0.1:0");
        let connector = Connector::new(addr, Arc::new(JsonPacker), || unreachable!());
        let connector = Connector {
            connect_timeout: Some(Duration::from_millis(200)),
            ..connector
        };
        assert!(connector.connect_once().is_err());
    }

    #[test]
    fn connect_once_succeeds_against_a_live_listener() {
        let listener = FramedSocket::listen(&Address::parse("127.0.0.1:0"), 1).unwrap();
        let port = match &listener {
            crate::socket::Listener::Tcp(l) => l.local_addr().unwrap().port(),
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let accept_thread = std::thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });
        let addr = Address::parse(&format!("127.0.0.1:{port}"));
        let connector = Connector::new(addr, Arc::new(JsonPacker), || Arc::new(EchoService));
        let connected = connector.connect_once();
        assert!(connected.is_ok());
        connected.unwrap().close();
        accept_thread.join().unwrap();
    }
}
