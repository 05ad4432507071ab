//! A connected socket paired with a reader thread, a writer thread, and a
//! [`Service`] to dispatch to.
//!
//! Grounded on `ipc.py`'s `IPCPort`: `_send_thread` drains an internal
//! queue and writes frames, shutting the read half and recording its error
//! if a write ever fails; `_main_thread` reads frames, dispatches them to
//! the service, and on exit shuts the write half and joins the send
//! thread so neither thread outlives the other. Thread names follow the
//! `<ServiceType>#<order>(S)`/`(M)` convention from the same module.

use crate::cancel::CancelToken;
use crate::error::{AlreadyStopped, PackError, PortError};
use crate::logging::{log, log_unless_shutting_down};
use crate::packer::{recv_frame, send_frame, Message, Packer};
use crate::queue::{CancelableQueue, GetResult};
use crate::service::{build_message, split_message, Event, Service};
use crate::socket::FramedSocket;
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

static PORT_ORDER: AtomicU64 = AtomicU64::new(1);

struct ThreadHandles {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// A single logical connection: one socket, one reader thread, one writer
/// thread, one [`Service`] (spec.md §4.3, §4.4).
pub struct Port {
    order: u64,
    send_queue: CancelableQueue<Message>,
    threads: Mutex<ThreadHandles>,
    cancel: CancelToken,
    /// A clone of the underlying socket kept solely so [`Self::close`] can
    /// unblock whichever thread is parked in a blocking read/write.
    shutdown_socket: FramedSocket,
}

impl Port {
    /// Spawns the reader and writer threads for an already-connected
    /// `socket` and returns the shared handle used to send to it. `event`
    /// names the lifecycle callback fired before the reader loop starts
    /// (`Connected` for a [`crate::connector::Connector`], `Accepted` for
    /// an [`crate::acceptor::Acceptor`]).
    pub fn start(
        socket: FramedSocket,
        packer: Arc<dyn Packer>,
        service: Arc<dyn Service>,
        event: Event,
    ) -> Arc<Port> {
        crate::shutdown::register();
        let order = PORT_ORDER.fetch_add(1, Ordering::SeqCst);
        let kind = if matches!(event, Event::Accepted) { "Acceptor" } else { "Connector" };

        let shutdown_socket = socket
            .try_clone()
            .expect("socket must be clonable for reader/writer split");
        let write_socket = socket
            .try_clone()
            .expect("socket must be clonable for reader/writer split");
        let read_socket = socket;

        let port = Arc::new(Port {
            order,
            send_queue: CancelableQueue::new(),
            threads: Mutex::new(ThreadHandles { reader: None, writer: None }),
            cancel: CancelToken::new(),
            shutdown_socket,
        });

        let writer_error: Arc<Mutex<Option<Arc<PortError>>>> = Arc::new(Mutex::new(None));

        let writer_port = port.clone();
        let writer_error_slot = writer_error.clone();
        let writer_packer = packer.clone();
        let writer_name = format!("{kind}#{order}(S)");
        let writer = std::thread::Builder::new()
            .name(writer_name)
            .spawn(move || writer_loop(writer_port, write_socket, writer_packer, writer_error_slot))
            .expect("failed to spawn port writer thread");

        let reader_port = port.clone();
        let reader_name = format!("{kind}#{order}(M)");
        let reader_service = service.clone();
        let reader_packer = packer;
        let reader = std::thread::Builder::new()
            .name(reader_name)
            .spawn(move || {
                reader_service.handle_event(&reader_port, &event);
                reader_loop(reader_port, read_socket, reader_packer, reader_service, writer_error);
            })
            .expect("failed to spawn port reader thread");

        {
            let mut handles = port.threads.lock().unwrap();
            handles.reader = Some(reader);
            handles.writer = Some(writer);
        }

        port
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    /// Queues `msg` for the writer thread. Fails once the port has begun
    /// shutting down.
    pub fn send(&self, msg: Message) -> Result<(), AlreadyStopped> {
        self.send_queue.put(msg)
    }

    /// Convenience over [`Self::send`] building a tagged message (spec.md
    /// §9's replacement for Python's dynamic `port.foo(...)` send sugar).
    pub fn send_tag(&self, tag: &str, args: Vec<Value>) -> Result<(), AlreadyStopped> {
        self.send(build_message(tag, args))
    }

    /// Requests a close: stops accepting new sends, cancels the reader
    /// loop, and shuts both socket halves so any thread blocked in a read
    /// or write wakes up immediately. Does not block for the threads to
    /// exit; call [`Self::join`] for that.
    pub fn close(&self) {
        self.cancel.cancel();
        self.send_queue.stop(true);
        self.shutdown_socket.shut_read();
        self.shutdown_socket.shut_write();
    }

    /// Blocks until both the reader and writer threads have exited.
    pub fn join(&self) {
        let (reader, writer) = {
            let mut handles = self.threads.lock().unwrap();
            (handles.reader.take(), handles.writer.take())
        };
        if let Some(r) = reader {
            let _ = r.join();
        }
        if let Some(w) = writer {
            let _ = w.join();
        }
    }
}

fn writer_loop(
    port: Arc<Port>,
    mut socket: FramedSocket,
    packer: Arc<dyn Packer>,
    error_slot: Arc<Mutex<Option<Arc<PortError>>>>,
) {
    loop {
        match port.send_queue.get(Some(Duration::from_millis(500))) {
            GetResult::Value(msg) => {
                let result = packer
                    .encode(&msg)
                    .map_err(PortError::from)
                    .and_then(|bytes| send_frame(&mut socket, &bytes).map_err(PortError::from));
                if let Err(e) = result {
                    let e = Arc::new(e);
                    *error_slot.lock().unwrap() = Some(e.clone());
                    socket.shut_read();
                    log_unless_shutting_down(&format!("port writer: send failed, shutting read half: {e}"));
                    return;
                }
            }
            GetResult::Timeout => {
                if port.cancel.is_canceled() {
                    return;
                }
            }
            GetResult::Stopped => return,
        }
    }
}

fn reader_loop(
    port: Arc<Port>,
    mut socket: FramedSocket,
    packer: Arc<dyn Packer>,
    service: Arc<dyn Service>,
    writer_error: Arc<Mutex<Option<Arc<PortError>>>>,
) {
    loop {
        if port.cancel.is_canceled() {
            break;
        }
        let frame = match recv_frame(&mut socket) {
            Ok(bytes) => bytes,
            Err(PackError::NoMoreData) => {
                fire_exit_event(&port, &service, &writer_error, None);
                break;
            }
            Err(e) => {
                fire_exit_event(&port, &service, &writer_error, Some(PortError::from(e)));
                break;
            }
        };
        let msg = match packer.decode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                fire_exit_event(&port, &service, &writer_error, Some(PortError::from(e)));
                break;
            }
        };
        match split_message(msg) {
            Some((tag, args)) => service.handle_message(&port, &tag, args),
            None => log("port reader: dropped a message with no string tag"),
        }
    }

    port.send_queue.stop(false);
    socket.shut_write();

    let writer = {
        let mut handles = port.threads.lock().unwrap();
        handles.writer.take()
    };
    if let Some(w) = writer {
        let _ = w.join();
    }
}

/// Fires the terminal `Disconnected`/`SockError` event once the reader loop
/// is ending, pairing a reader-side error with an already-captured writer
/// error per spec.md §9's structured-cause-chain resolution.
fn fire_exit_event(
    port: &Arc<Port>,
    service: &Arc<dyn Service>,
    writer_error: &Arc<Mutex<Option<Arc<PortError>>>>,
    reader_error: Option<PortError>,
) {
    let send_error = writer_error.lock().unwrap().clone();
    let event = match (send_error, reader_error) {
        (None, None) => Event::Disconnected,
        (None, Some(e)) => Event::SockError(Arc::new(e)),
        (Some(send_error), None) => Event::SockError(send_error),
        (Some(send_error), Some(reader_error)) => Event::SockError(Arc::new(PortError::ReaderAfterSendFailure {
            send_error,
            reader_error: Box::new(reader_error),
        })),
    };
    service.handle_event(port, &event);
}
