//! The process-wide table of locally exposed callables, and dispatch of
//! incoming `call` messages against it.
//!
//! Grounded on `rpc.py`'s `_ProxyBackendManager`: a class-level lock and
//! counter (`_proxy_id`), a `_proxy_db` dict keyed by id, `quick` methods
//! dispatched inline versus everything else handed to the shared thread
//! pool (`tu.threadpool.queue`), and replies suppressed entirely when
//! `reply_id == 0` (the `no_reply` / fire-and-forget path).

use portline::{Port, ThreadPool, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

/// A locally exposed callable: takes the port the call arrived on (so
/// handlers can read `port.order()` as a correlation id, the Rust stand-in
/// for the original `cid__` parameter convention) and the decoded argument
/// list, returning either a result value or an error message.
pub type Callable = Arc<dyn Fn(&Arc<Port>, Vec<Value>) -> Result<Value, String> + Send + Sync>;

struct Entry {
    func: Callable,
    /// Dispatched inline on the reader thread rather than handed to the
    /// pool; for handlers cheap enough that pool latency would dominate.
    quick: bool,
}

struct Registry {
    entries: Mutex<HashMap<i64, Entry>>,
    next_id: AtomicI64,
}

/// The process-wide backend registry and its dispatch thread pool, mirroring
/// `rpc.py`'s module-level `_ProxyBackendManager` class state and the
/// shared `tu.threadpool` singleton it dispatches non-quick calls onto.
pub struct BackendRegistry {
    registry: Registry,
    pool: ThreadPool,
}

static BACKEND: LazyLock<BackendRegistry> = LazyLock::new(|| BackendRegistry {
    registry: Registry {
        entries: Mutex::new(HashMap::new()),
        next_id: AtomicI64::new(1),
    },
    pool: ThreadPool::new(128, 8, std::time::Duration::from_secs(60)),
});

/// The shared backend registry.
pub fn backend() -> &'static BackendRegistry {
    &BACKEND
}

impl BackendRegistry {
    /// Registers `func`, returning the proxy id it's now reachable under.
    pub fn register(&self, func: Callable, quick: bool) -> i64 {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry.entries.lock().unwrap().insert(id, Entry { func, quick });
        id
    }

    /// Drops a registration. A no-op if `id` is already gone — mirrors
    /// `_ProxyBackendManager.unref`'s tolerance of a double-unref.
    pub fn unref(&self, id: i64) {
        self.registry.entries.lock().unwrap().remove(&id);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.registry.entries.lock().unwrap().contains_key(&id)
    }

    /// Looks up `id` and runs it against `args`, either inline (`quick`) or
    /// on the shared pool, invoking `on_result` with the outcome. Returns
    /// `false` if `id` has no registration (the caller sends the
    /// not-found reply itself, since it knows the reply id).
    pub fn dispatch(
        &self,
        id: i64,
        port: Arc<Port>,
        args: Vec<Value>,
        on_result: impl FnOnce(Result<Value, String>) + Send + 'static,
    ) -> bool {
        let entry = {
            let entries = self.registry.entries.lock().unwrap();
            match entries.get(&id) {
                Some(e) => (e.func.clone(), e.quick),
                None => return false,
            }
        };
        let (func, quick) = entry;
        if quick {
            let result = func(&port, args);
            on_result(result);
        } else {
            let queued = self.pool.queue(move || {
                let result = func(&port, args);
                on_result(result);
            });
            if queued.is_err() {
                on_result(Err("backend thread pool has been stopped".to_owned()));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portline::{Event, Service};
    use std::sync::mpsc;

    struct NullService;
    impl Service for NullService {
        fn handle_message(&self, _port: &Arc<Port>, _tag: &str, _args: Vec<Value>) {}
    }

    fn fresh_port() -> Arc<Port> {
        let listener = portline::FramedSocket::listen(&portline::Address::parse("127.0.0.1:0"), 1).unwrap();
        // A loopback pair is used purely so `Port::start` has a socket to
        // own; these registry tests never send anything over it.
        let addr_port = match &listener {
            portline::socket::Listener::Tcp(l) => l.local_addr().unwrap().port(),
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let addr = portline::Address::parse(&format!("127.0.0.1:{addr_port}"));
        let client = std::thread::spawn(move || portline::FramedSocket::connect(&addr, None).unwrap());
        let server_socket = listener.accept().unwrap();
        let _ = client.join().unwrap();
        Port::start(server_socket, Arc::new(portline::JsonPacker), Arc::new(NullService), Event::Accepted)
    }

    #[test]
    fn register_then_dispatch_quick_runs_inline() {
        let registry = BackendRegistry {
            registry: Registry {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
            },
            pool: ThreadPool::new(4, 1, std::time::Duration::from_millis(50)),
        };
        let id = registry.register(Arc::new(|_port, args| Ok(args.into_iter().next().unwrap())), true);
        let port = fresh_port();
        let (tx, rx) = mpsc::channel();
        let found = registry.dispatch(id, port.clone(), vec![Value::Int(7)], move |r| tx.send(r).unwrap());
        assert!(found);
        assert_eq!(rx.recv().unwrap(), Ok(Value::Int(7)));
        port.close();
    }

    #[test]
    fn dispatch_on_unknown_id_returns_false() {
        let registry = BackendRegistry {
            registry: Registry {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
            },
            pool: ThreadPool::new(4, 1, std::time::Duration::from_millis(50)),
        };
        let port = fresh_port();
        let found = registry.dispatch(999, port.clone(), vec![], |_| {});
        assert!(!found);
        port.close();
    }

    #[test]
    fn unref_removes_entry() {
        let registry = BackendRegistry {
            registry: Registry {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
            },
            pool: ThreadPool::new(4, 1, std::time::Duration::from_millis(50)),
        };
        let id = registry.register(Arc::new(|_p, _a| Ok(Value::Null)), true);
        assert!(registry.contains(id));
        registry.unref(id);
        assert!(!registry.contains(id));
    }
}
