//! Minimal blocking socket abstraction.
//!
//! All operations block. There are no implicit timeouts, callers needing a
//! bounded wait set one explicitly with [`Socket::set_timeout`].

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Type};

use crate::error::{Error, Result};

/// How long a closing listener-side socket keeps trying to deliver unsent
/// data.
pub const LINGER_TIME: Duration = Duration::from_secs(5);

/// Largest single read issued by `receive_exact`.
const RECEIVE_CHUNK: usize = 64 * 1024;

/// Platform independent socket error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None,
    NotOpen,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NotConnected,
    AddrInUse,
    AddrNotAvailable,
    BrokenPipe,
    WouldBlock,
    TimedOut,
    Interrupted,
    UnexpectedEof,
    InvalidInput,
    PermissionDenied,
    Other,
}

impl From<io::ErrorKind> for ErrorCode {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorCode::ConnectionReset,
            io::ErrorKind::ConnectionAborted => ErrorCode::ConnectionAborted,
            io::ErrorKind::NotConnected => ErrorCode::NotConnected,
            io::ErrorKind::AddrInUse => ErrorCode::AddrInUse,
            io::ErrorKind::AddrNotAvailable => ErrorCode::AddrNotAvailable,
            io::ErrorKind::BrokenPipe => ErrorCode::BrokenPipe,
            io::ErrorKind::WouldBlock => ErrorCode::WouldBlock,
            io::ErrorKind::TimedOut => ErrorCode::TimedOut,
            io::ErrorKind::Interrupted => ErrorCode::Interrupted,
            io::ErrorKind::UnexpectedEof => ErrorCode::UnexpectedEof,
            io::ErrorKind::InvalidInput => ErrorCode::InvalidInput,
            io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            _ => ErrorCode::Other,
        }
    }
}

/// Blocking TCP socket.
pub struct Socket {
    inner: Option<socket2::Socket>,
    last_error: ErrorCode,
}

impl Socket {
    /// Opens a new IPv4 stream socket.
    pub fn open() -> Result<Socket> {
        let inner = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| transport_error("open", e))?;
        Ok(Socket {
            inner: Some(inner),
            last_error: ErrorCode::None,
        })
    }

    fn from_inner(inner: socket2::Socket) -> Socket {
        Socket {
            inner: Some(inner),
            last_error: ErrorCode::None,
        }
    }

    /// Binds to `port` on all interfaces. Port `0` picks a free port.
    ///
    /// Address reuse and lingering close are enabled first, so a restarted
    /// worker can bind its port again right away.
    pub fn bind(&mut self, port: u16) -> Result<()> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        self.call("bind", |s| {
            s.set_reuse_address(true)?;
            s.set_linger(Some(LINGER_TIME))?;
            s.bind(&SockAddr::from(addr))
        })
    }

    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        self.call("listen", |s| s.listen(backlog))
    }

    /// Waits for the next incoming connection.
    pub fn accept(&mut self) -> Result<Socket> {
        let (conn, peer) = self.call("accept", |s| s.accept())?;
        trace!("accepted connection from {:?}", peer.as_socket());
        // accepted sockets may inherit non-blocking mode on some platforms
        conn.set_nonblocking(false)
            .map_err(|e| transport_error("accept", e))?;
        Ok(Socket::from_inner(conn))
    }

    /// Connects to the first IPv4 address `host` resolves to.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| self.record("resolve", e))?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| {
                self.last_error = ErrorCode::AddrNotAvailable;
                Error::Transport {
                    op: "connect",
                    code: ErrorCode::AddrNotAvailable,
                    message: format!("no IPv4 address for {}", host),
                }
            })?;
        self.call("connect", |s| s.connect(&SockAddr::from(addr)))
    }

    /// Sends bytes, returning how many were actually written.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.call("send", |mut s| s.write(bytes))
    }

    /// Receives at most `max` bytes. An empty buffer means the peer closed
    /// the connection.
    pub fn receive(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; max];
        let count = self.call("receive", |mut s| s.read(&mut buf))?;
        buf.truncate(count);
        Ok(buf)
    }

    /// Sends all of `bytes`, looping over partial writes.
    pub fn send_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < bytes.len() {
            let count = match self.send(&bytes[sent..]) {
                Ok(c) => c,
                Err(Error::Transport {
                    code: ErrorCode::Interrupted,
                    ..
                }) => continue,
                Err(e) => return Err(e),
            };
            if count == 0 {
                self.last_error = ErrorCode::BrokenPipe;
                return Err(Error::Connection(
                    "peer stopped accepting data".to_string(),
                ));
            }
            sent += count;
        }
        Ok(())
    }

    /// Receives exactly `len` bytes, unless the peer closes first, in which
    /// case the shorter buffer read so far is returned.
    pub fn receive_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(RECEIVE_CHUNK));
        while buf.len() < len {
            let chunk = match self.receive((len - buf.len()).min(RECEIVE_CHUNK)) {
                Ok(c) => c,
                Err(Error::Transport {
                    code: ErrorCode::Interrupted,
                    ..
                }) => continue,
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }

    /// Shuts down both directions of the connection.
    pub fn shutdown(&mut self) -> Result<()> {
        self.call("shutdown", |s| s.shutdown(Shutdown::Both))
    }

    /// Releases the socket. Any later operation fails with
    /// [`ErrorCode::NotOpen`].
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Code of the last failed operation.
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// Sets a read and write timeout. `None` restores fully blocking mode.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.call("set_timeout", |s| {
            s.set_read_timeout(timeout)?;
            s.set_write_timeout(timeout)
        })
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.call("set_nonblocking", |s| s.set_nonblocking(nonblocking))
    }

    pub fn local_port(&self) -> Result<u16> {
        let inner = self.inner.as_ref().ok_or_else(not_open)?;
        let addr = inner
            .local_addr()
            .map_err(|e| transport_error("local_addr", e))?;
        addr.as_socket()
            .map(|a| a.port())
            .ok_or_else(|| Error::Other("socket has no inet address".to_string()))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .and_then(|a| a.as_socket())
    }

    fn call<T, F>(&mut self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&socket2::Socket) -> io::Result<T>,
    {
        let inner = match &self.inner {
            Some(s) => s,
            None => {
                self.last_error = ErrorCode::NotOpen;
                return Err(not_open());
            }
        };
        match f(inner) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.record(op, e)),
        }
    }

    fn record(&mut self, op: &'static str, e: io::Error) -> Error {
        let error = transport_error(op, e);
        if let Error::Transport { code, .. } = &error {
            self.last_error = *code;
        }
        error
    }
}

fn transport_error(op: &'static str, e: io::Error) -> Error {
    Error::Transport {
        op,
        code: e.kind().into(),
        message: e.to_string(),
    }
}

fn not_open() -> Error {
    Error::Transport {
        op: "socket",
        code: ErrorCode::NotOpen,
        message: "socket is closed".to_string(),
    }
}
