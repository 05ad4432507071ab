//! Timed, blocking read/write of length-prefixed chunks over a stream
//! socket, plus the address grammar used to reach one.
//!
//! Grounded on `ipc.py`'s `CSocket`: separate initial/next recv timeouts, a
//! single send timeout, keepalive/nodelay tuning on TCP sockets, and
//! half-shutdown helpers that swallow "not connected" but log everything
//! else.

use crate::error::SocketError;
use crate::logging::log;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

/// An address a [`Connector`](crate::connector::Connector) or
/// [`Acceptor`](crate::acceptor::Acceptor) can bind or connect to.
///
/// Grammar (spec.md §3, §6): a string containing `:` with an all-digit
/// suffix is TCP (`"*"` as the host means bind-all); anything else is a
/// filesystem path naming a Unix domain socket.
#[derive(Debug, Clone)]
pub enum Address {
    Tcp(String, u16),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Address {
    /// Parses the address grammar described in spec.md §3/§6.
    pub fn parse(s: &str) -> Address {
        if let Some((host, port)) = s.rsplit_once(':') {
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                let host = if host == "*" { "0.0.0.0" } else { host };
                if let Ok(port_n) = port.parse::<u16>() {
                    return Address::Tcp(host.to_owned(), port_n);
                }
            }
        }
        #[cfg(unix)]
        {
            Address::Unix(PathBuf::from(s))
        }
        #[cfg(not(unix))]
        {
            panic!("'{s}' does not parse as host:port and this platform has no Unix sockets")
        }
    }

    fn display(&self) -> String {
        match self {
            Address::Tcp(h, p) => format!("{h}:{p}"),
            #[cfg(unix)]
            Address::Unix(p) => p.display().to_string(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// The keepalive idle/interval/count triple applied to TCP sockets
/// (spec.md §4.1's "~180/5/12 s" default).
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub idle: Duration,
    pub interval: Duration,
    pub count: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive {
            idle: Duration::from_secs(180),
            interval: Duration::from_secs(5),
            count: 12,
        }
    }
}

enum RawSocket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A timed, blocking stream socket with the framing primitives every
/// [`Packer`](crate::packer::Packer) builds on.
pub struct FramedSocket {
    raw: RawSocket,
    pub is_server: bool,
    pub send_timeout: Option<Duration>,
    pub initial_recv_timeout: Option<Duration>,
    pub next_recv_timeout: Option<Duration>,
}

/// Result of [`FramedSocket::recv_exact`]: either the full request was read,
/// or the peer went away partway through and the remaining byte count is
/// reported so callers can distinguish clean EOF from a mid-frame drop.
pub struct RecvResult {
    pub data: Vec<u8>,
    pub remaining: usize,
}

impl FramedSocket {
    fn new(raw: RawSocket, is_server: bool) -> Self {
        let mut sock = FramedSocket {
            raw,
            is_server,
            send_timeout: Some(Duration::from_secs(120)),
            initial_recv_timeout: None,
            next_recv_timeout: Some(Duration::from_secs(120)),
        };
        sock.tune();
        sock
    }

    fn tune(&mut self) {
        if let RawSocket::Tcp(stream) = &self.raw {
            let sock2 = socket2::SockRef::from(stream);
            if let Err(e) = sock2.set_nodelay(true) {
                log(&format!("socket: failed to set TCP_NODELAY: {e}"));
            }
            let ka = Keepalive::default();
            let params = socket2::TcpKeepalive::new()
                .with_time(ka.idle)
                .with_interval(ka.interval);
            #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
            let params = params.with_retries(ka.count);
            if let Err(e) = sock2.set_tcp_keepalive(&params) {
                log(&format!("socket: failed to set keepalive: {e}"));
            }
        }
    }

    /// Connects to `addr`, applying `connect_timeout` (`None` = infinite) to
    /// the connect attempt only.
    pub fn connect(addr: &Address, connect_timeout: Option<Duration>) -> Result<Self, SocketError> {
        let raw = match addr {
            Address::Tcp(host, port) => {
                let sock_addr = resolve_one(host, *port)?;
                let stream = match connect_timeout {
                    Some(tmo) => TcpStream::connect_timeout(&sock_addr, tmo)?,
                    None => TcpStream::connect(sock_addr)?,
                };
                RawSocket::Tcp(stream)
            }
            #[cfg(unix)]
            Address::Unix(path) => RawSocket::Unix(UnixStream::connect(path)?),
        };
        Ok(FramedSocket::new(raw, false))
    }

    /// Binds and listens, unlinking a stale Unix socket file first
    /// (spec.md §4.1).
    pub fn listen(addr: &Address, backlog: i32) -> Result<Listener, SocketError> {
        match addr {
            Address::Tcp(host, port) => {
                let sock_addr = resolve_one(host, *port)?;
                let socket = socket2::Socket::new(
                    socket2::Domain::for_address(sock_addr),
                    socket2::Type::STREAM,
                    None,
                )?;
                socket.set_reuse_address(true)?;
                socket.bind(&sock_addr.into())?;
                socket.listen(backlog)?;
                Ok(Listener::Tcp(socket.into()))
            }
            #[cfg(unix)]
            Address::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                Ok(Listener::Unix(UnixListener::bind(path)?))
            }
        }
    }

    /// Reads exactly `n` bytes, honoring the initial-wait timeout for the
    /// first byte and the next-recv timeout for every subsequent chunk.
    /// Returns partial data with a nonzero `remaining` count on clean EOF so
    /// the packer can tell a frame-boundary disconnect from a mid-frame one.
    pub fn recv_exact(&mut self, n: usize) -> Result<RecvResult, SocketError> {
        let mut data = Vec::with_capacity(n);
        let mut remaining = n;
        let mut first = true;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let tmo = if first {
                self.initial_recv_timeout
            } else {
                self.next_recv_timeout
            };
            if let Some(tmo) = tmo {
                if !self.wait_readable(tmo)? {
                    return Err(SocketError::RecvTimeout(tmo));
                }
            }
            let want = remaining.min(buf.len());
            let n_read = self.read(&mut buf[..want])?;
            if n_read == 0 {
                return Ok(RecvResult { data, remaining });
            }
            data.extend_from_slice(&buf[..n_read]);
            remaining -= n_read;
            first = false;
        }
        Ok(RecvResult { data, remaining: 0 })
    }

    /// Writes all of `buf`, blocking on writability with the send timeout
    /// between each write.
    pub fn send_all(&mut self, buf: &[u8]) -> Result<(), SocketError> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            if let Some(tmo) = self.send_timeout {
                if !self.wait_writable(tmo)? {
                    return Err(SocketError::SendTimeout(tmo));
                }
            }
            let n = self.write(remaining)?;
            remaining = &remaining[n..];
        }
        Ok(())
    }

    fn wait_readable(&self, tmo: Duration) -> Result<bool, SocketError> {
        self.wait(tmo, true)
    }

    fn wait_writable(&self, tmo: Duration) -> Result<bool, SocketError> {
        self.wait(tmo, false)
    }

    fn wait(&self, tmo: Duration, read: bool) -> Result<bool, SocketError> {
        let fd = self.as_poll_fd();
        poll_one(fd, tmo, read)
    }

    #[cfg(unix)]
    fn as_poll_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        match &self.raw {
            RawSocket::Tcp(s) => s.as_raw_fd(),
            RawSocket::Unix(s) => s.as_raw_fd(),
        }
    }

    /// Half-shuts the read side. "Not connected" is swallowed silently;
    /// other errors are logged, never raised (spec.md §4.1).
    pub fn shut_read(&self) {
        self.shutdown(std::net::Shutdown::Read);
    }

    /// Half-shuts the write side. Same error policy as [`Self::shut_read`].
    pub fn shut_write(&self) {
        self.shutdown(std::net::Shutdown::Write);
    }

    fn shutdown(&self, how: std::net::Shutdown) {
        let result = match &self.raw {
            RawSocket::Tcp(s) => s.shutdown(how),
            #[cfg(unix)]
            RawSocket::Unix(s) => s.shutdown(how),
        };
        if let Err(e) = result {
            if e.kind() != ErrorKind::NotConnected {
                log(&format!("socket: shutdown error: {e}"));
            }
        }
    }

    pub fn try_clone(&self) -> std::io::Result<FramedSocket> {
        let raw = match &self.raw {
            RawSocket::Tcp(s) => RawSocket::Tcp(s.try_clone()?),
            #[cfg(unix)]
            RawSocket::Unix(s) => RawSocket::Unix(s.try_clone()?),
        };
        Ok(FramedSocket {
            raw,
            is_server: self.is_server,
            send_timeout: self.send_timeout,
            initial_recv_timeout: self.initial_recv_timeout,
            next_recv_timeout: self.next_recv_timeout,
        })
    }
}

impl Read for FramedSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.raw {
            RawSocket::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            RawSocket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for FramedSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.raw {
            RawSocket::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            RawSocket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.raw {
            RawSocket::Tcp(s) => s.flush(),
            #[cfg(unix)]
            RawSocket::Unix(s) => s.flush(),
        }
    }
}

/// A listening socket, produced by [`FramedSocket::listen`].
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    pub fn accept(&self) -> std::io::Result<FramedSocket> {
        let raw = match self {
            Listener::Tcp(l) => RawSocket::Tcp(l.accept()?.0),
            #[cfg(unix)]
            Listener::Unix(l) => RawSocket::Unix(l.accept()?.0),
        };
        Ok(FramedSocket::new(raw, true))
    }

    /// The address actually bound, as a display string. For TCP this
    /// resolves an ephemeral `:0` port to the one the kernel picked; for a
    /// Unix socket it's just the path.
    pub fn local_addr_display(&self) -> String {
        match self {
            Listener::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|e| format!("<unknown: {e}>")),
            #[cfg(unix)]
            Listener::Unix(l) => l
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "<unnamed unix socket>".to_owned()),
        }
    }
}

fn resolve_one(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(ErrorKind::AddrNotAvailable, "no address resolved"))
}

#[cfg(unix)]
fn poll_one(fd: std::os::fd::RawFd, tmo: Duration, read: bool) -> Result<bool, SocketError> {
    let deadline = Instant::now() + tmo;
    loop {
        let mut pfd = libc::pollfd {
            fd,
            events: if read { libc::POLLIN } else { libc::POLLOUT },
            revents: 0,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                continue;
            }
            return Err(SocketError::Io(err));
        }
        return Ok(rc > 0);
    }
}
