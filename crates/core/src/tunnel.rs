use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::connection::SocketHandle;
use crate::error::MuxError;

/// A raw byte stream to a TCP port on a device.
///
/// Framing stops once the daemon accepts a `Connect`; from then on the socket
/// carries the forwarded protocol untouched. Closing is idempotent and also
/// happens on drop.
#[derive(Debug)]
pub struct Tunnel {
    socket: SocketHandle,
    device_id: u64,
    port: u16,
}

impl Tunnel {
    pub(crate) fn new(socket: SocketHandle, device_id: u64, port: u16) -> Self {
        Self { socket, device_id, port }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn close(&self) {
        self.socket.close();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    fn live(&self) -> io::Result<&crate::connection::Stream> {
        self.socket
            .stream()
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, MuxError::UseAfterClose))
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.socket.close();
    }
}

impl Read for &Tunnel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.live()?.read(buf)
    }
}

impl Write for &Tunnel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.live()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Tunnel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for Tunnel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsFd for Tunnel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl AsRawFd for Tunnel {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// A duplex stream whose write half can be closed on its own.
pub trait HalfClose: AsFd {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all_bytes(&self, data: &[u8]) -> io::Result<()>;
    fn shutdown_write(&self) -> io::Result<()>;
}

impl HalfClose for Tunnel {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut this = self;
        this.read(buf)
    }

    fn write_all_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut this = self;
        this.write_all(data)
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.live()?.shutdown(Shutdown::Write)
    }
}

impl HalfClose for TcpStream {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut this = self;
        this.read(buf)
    }

    fn write_all_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut this = self;
        this.write_all(data)
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl HalfClose for UnixStream {
    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut this = self;
        this.read(buf)
    }

    fn write_all_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut this = self;
        this.write_all(data)
    }

    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}
