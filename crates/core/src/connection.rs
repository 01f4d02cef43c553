use log::debug;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MuxError, Result};
use crate::protocol::{self, FrameHeader, FrameState, FULL_HEADER_LEN, PLIST_MESSAGE_TYPE, SHORT_HEADER_LEN};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/usbmuxd";

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// The daemon's well-known Unix socket. A daemon reached over TCP
    /// (`127.0.0.1:27015` on hosts without one) is selected by address.
    pub fn platform_default() -> Self {
        Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
    }

    pub fn connect(&self) -> Result<Stream> {
        let connect_error = |source| MuxError::Connect { endpoint: self.to_string(), source };

        match self {
            Endpoint::Unix(path) => {
                if !path.exists() {
                    return Err(connect_error(io::Error::new(
                        io::ErrorKind::NotFound,
                        "socket path does not exist",
                    )));
                }
                UnixStream::connect(path).map(Stream::Unix).map_err(connect_error)
            }
            Endpoint::Tcp { host, port } => {
                TcpStream::connect((host.as_str(), *port)).map(Stream::Tcp).map_err(connect_error)
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = MuxError;

    /// `host:port` selects TCP, anything else is a Unix socket path.
    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| MuxError::Connect {
                    endpoint: s.to_string(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "invalid port"),
                })?;
                Ok(Endpoint::Tcp { host: host.to_string(), port })
            }
            None => Ok(Endpoint::Unix(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// A connected stream socket of either family.
#[derive(Debug)]
pub enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.shutdown(how),
            Stream::Tcp(s) => s.shutdown(how),
        }
    }

    pub fn read_timeout(&self) -> io::Result<Option<Duration>> {
        match self {
            Stream::Unix(s) => s.read_timeout(),
            Stream::Tcp(s) => s.read_timeout(),
        }
    }

    pub fn write_timeout(&self) -> io::Result<Option<Duration>> {
        match self {
            Stream::Unix(s) => s.write_timeout(),
            Stream::Tcp(s) => s.write_timeout(),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.set_read_timeout(timeout),
            Stream::Tcp(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.set_write_timeout(timeout),
            Stream::Tcp(s) => s.set_write_timeout(timeout),
        }
    }
}

impl Read for &Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => (&*s).read(buf),
            Stream::Tcp(s) => (&*s).read(buf),
        }
    }
}

impl Write for &Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => (&*s).write(buf),
            Stream::Tcp(s) => (&*s).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsFd for Stream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Stream::Unix(s) => s.as_fd(),
            Stream::Tcp(s) => s.as_fd(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        self.as_fd().as_raw_fd()
    }
}

impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Stream::Unix(stream)
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Stream::Tcp(stream)
    }
}

#[derive(Debug)]
struct SocketCell {
    stream: Stream,
    closed: AtomicBool,
}

impl SocketCell {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Closing socket");
        // Wakes any reader blocked on this socket in another thread.
        let _ = self.stream.shutdown(Shutdown::Both);
        true
    }
}

impl Drop for SocketCell {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared ownership of one socket.
///
/// Every clone refers to the same socket; `close` releases it exactly once no
/// matter how many clones call it, and the last clone dropped acts as the
/// backstop.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    cell: Arc<SocketCell>,
}

impl SocketHandle {
    pub fn new(stream: Stream) -> Self {
        Self { cell: Arc::new(SocketCell { stream, closed: AtomicBool::new(false) }) }
    }

    /// Release the socket. Returns false if it was already released.
    pub fn close(&self) -> bool {
        self.cell.close()
    }

    pub fn is_closed(&self) -> bool {
        self.cell.closed.load(Ordering::SeqCst)
    }

    /// The live stream, or `UseAfterClose` once released.
    pub fn stream(&self) -> Result<&Stream> {
        if self.is_closed() {
            return Err(MuxError::UseAfterClose);
        }
        Ok(&self.cell.stream)
    }

    /// The stream regardless of state, for socket option queries.
    pub(crate) fn raw_stream(&self) -> &Stream {
        &self.cell.stream
    }
}

impl AsFd for SocketHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.cell.stream.as_fd()
    }
}

impl AsRawFd for SocketHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.cell.stream.as_raw_fd()
    }
}

/// Applies a socket timeout for one scope and puts back whatever was there.
struct TimeoutGuard {
    socket: SocketHandle,
    read: Option<Duration>,
    write: Option<Duration>,
}

impl TimeoutGuard {
    fn apply(socket: &SocketHandle, timeout: Option<Duration>) -> Result<Self> {
        let stream = socket.stream()?;
        let read = stream.read_timeout().map_err(MuxError::Receive)?;
        let write = stream.write_timeout().map_err(MuxError::Send)?;

        let guard = Self { socket: socket.clone(), read, write };
        stream.set_read_timeout(timeout).map_err(MuxError::Receive)?;
        stream.set_write_timeout(timeout).map_err(MuxError::Send)?;
        Ok(guard)
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        let stream = self.socket.raw_stream();
        let _ = stream.set_read_timeout(self.read);
        let _ = stream.set_write_timeout(self.write);
    }
}

/// One framed plist conversation with the daemon.
#[derive(Debug)]
pub struct Connection {
    socket: SocketHandle,
    tag: u32,
    send_state: FrameState,
    recv_state: FrameState,
}

impl Connection {
    pub fn open(endpoint: &Endpoint, tag: u32) -> Result<Self> {
        let stream = endpoint.connect()?;
        debug!("Connected to {endpoint} (tag {tag})");
        Ok(Self::from_stream(stream, tag))
    }

    /// Wrap an already connected socket.
    pub fn from_stream(stream: impl Into<Stream>, tag: u32) -> Self {
        Self {
            socket: SocketHandle::new(stream.into()),
            tag,
            send_state: FrameState::AwaitingFirstFrame,
            recv_state: FrameState::AwaitingFirstFrame,
        }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn send_state(&self) -> FrameState {
        self.send_state
    }

    pub fn recv_state(&self) -> FrameState {
        self.recv_state
    }

    /// A handle that can close this connection from elsewhere.
    pub fn close_handle(&self) -> SocketHandle {
        self.socket.clone()
    }

    pub fn close(&self) {
        self.socket.close();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    pub fn read_timeout(&self) -> io::Result<Option<Duration>> {
        self.socket.raw_stream().read_timeout()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.stream()?.set_read_timeout(timeout).map_err(MuxError::Receive)
    }

    pub fn send_message(&mut self, payload: &plist::Dictionary) -> Result<()> {
        self.send_message_as(payload, PLIST_MESSAGE_TYPE)
    }

    pub fn send_message_as(&mut self, payload: &plist::Dictionary, message_type: u32) -> Result<()> {
        let body = protocol::encode_payload(payload)?;
        let frame = protocol::encode_frame(self.send_state, message_type, self.tag, &body)?;

        let mut stream = self.socket.stream()?;
        if let Err(e) = stream.write_all(&frame) {
            return Err(self.fail(MuxError::Send(e)));
        }

        self.send_state = FrameState::Streaming;
        Ok(())
    }

    pub fn receive_message(&mut self) -> Result<plist::Dictionary> {
        self.receive_with_header(self.recv_state)
    }

    /// Receive a frame that carries the full 16-byte header whatever the
    /// connection state. The daemon sends device events this way.
    pub fn receive_full_message(&mut self) -> Result<plist::Dictionary> {
        self.receive_with_header(FrameState::AwaitingFirstFrame)
    }

    fn receive_with_header(&mut self, header_state: FrameState) -> Result<plist::Dictionary> {
        let payload_len = match header_state {
            FrameState::AwaitingFirstFrame => {
                let mut header = [0u8; FULL_HEADER_LEN];
                self.read_exact(&mut header)?;
                let header = FrameHeader::decode(&header);
                debug!(
                    "Received header: length={} version={} type={} tag={}",
                    header.length, header.version, header.message_type, header.tag
                );
                header.payload_len().map_err(|e| self.fail(e))?
            }
            FrameState::Streaming => {
                let mut header = [0u8; SHORT_HEADER_LEN];
                self.read_exact(&mut header)?;
                u32::from_be_bytes(header) as usize
            }
        };
        let payload_len = protocol::check_payload_len(payload_len).map_err(|e| self.fail(e))?;
        self.recv_state = FrameState::Streaming;

        let mut body = vec![0u8; payload_len];
        self.read_exact(&mut body)?;

        protocol::decode_payload(&body).map_err(|e| self.fail(e))
    }

    /// Send a request and wait for its reply with `timeout` applied to both.
    /// The previous socket timeouts are restored afterwards, on error too.
    pub fn send_and_receive(
        &mut self,
        payload: &plist::Dictionary,
        timeout: Option<Duration>,
    ) -> Result<plist::Dictionary> {
        let _guard = TimeoutGuard::apply(&self.socket, timeout)?;
        self.send_message(payload)?;
        self.receive_message()
    }

    /// Hand the raw socket over; no more framing happens on it.
    pub fn into_socket(self) -> SocketHandle {
        self.socket
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.socket.stream()?;
        match stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(MuxError::Receive(e))),
        }
    }

    /// A frame failed midway: the stream position is unknown, release it.
    fn fail(&self, err: MuxError) -> MuxError {
        if self.socket.close() {
            err
        } else {
            MuxError::UseAfterClose
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
