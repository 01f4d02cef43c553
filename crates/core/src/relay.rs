//! Expose a device port as a plain local TCP endpoint.

use anyhow::{Context, Result};
use log::{debug, info};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::AsFd;

use crate::device::{select_device, DeviceRecord};
use crate::error::MuxError;
use crate::mux::Usbmux;
use crate::poll::wait_readable;
use crate::tunnel::{HalfClose, Tunnel};

const CHUNK_SIZE: usize = 16 * 1024;

/// Bytes moved by one forwarding session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// From the local client into the tunnel.
    pub upstream: u64,
    /// From the tunnel back to the local client.
    pub downstream: u64,
}

/// Resolves a device and opens tunnels to one of its ports.
#[derive(Debug)]
pub struct RelayService {
    mux: Usbmux,
    udid: Option<String>,
    port: u16,
}

impl RelayService {
    pub fn new(mux: Usbmux, udid: Option<String>, port: u16) -> Self {
        Self { mux, udid, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn resolve_device(&self) -> std::result::Result<DeviceRecord, MuxError> {
        let devices = self.mux.list_devices()?;
        select_device(&devices, self.udid.as_deref()).cloned()
    }

    /// A tunnel for callers that can use the stream directly.
    pub fn open_tunnel(&self) -> std::result::Result<Tunnel, MuxError> {
        let device = self.resolve_device()?;
        debug!("Selected device {} (id {})", device.udid, device.device_id);
        self.mux.connect_device_port(device.device_id, self.port)
    }

    /// Listen on `addr` for local clients to forward.
    pub fn bind<A: ToSocketAddrs>(&self, addr: A) -> Result<RelayListener<'_>> {
        let listener = TcpListener::bind(addr).context("Failed to bind relay listener")?;
        Ok(RelayListener { service: self, listener })
    }

    /// Listen on an ephemeral loopback port.
    pub fn bind_ephemeral(&self) -> Result<RelayListener<'_>> {
        self.bind(("127.0.0.1", 0))
    }
}

pub struct RelayListener<'a> {
    service: &'a RelayService,
    listener: TcpListener,
}

impl RelayListener<'_> {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read relay address")
    }

    /// Accept one client and forward it through a new tunnel until both
    /// directions have finished.
    pub fn serve_one(&self) -> Result<ForwardStats> {
        let (client, peer) = self.listener.accept().context("Failed to accept relay client")?;
        info!("Relay client connected from {peer}");

        let tunnel = self.service.open_tunnel().context("Failed to open device tunnel")?;
        let stats = forward(&client, &tunnel).context("Relay forwarding failed")?;
        tunnel.close();

        info!("Relay client {peer} done ({} bytes up, {} bytes down)", stats.upstream, stats.downstream);
        Ok(stats)
    }
}

/// Copy bytes both ways between `a` and `b` until each side has hit
/// end-of-stream.
///
/// When one side stops sending, the other side's write half is shut down and
/// the opposite direction keeps flowing.
pub fn forward<A: HalfClose, B: HalfClose>(a: &A, b: &B) -> io::Result<ForwardStats> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut stats = ForwardStats::default();
    let mut a_open = true;
    let mut b_open = true;

    while a_open || b_open {
        let [a_ready, b_ready] =
            wait_readable([a_open.then(|| a.as_fd()), b_open.then(|| b.as_fd())])?;

        if a_ready {
            match pump(a, b, &mut buf)? {
                Some(n) => stats.upstream += n as u64,
                None => a_open = false,
            }
        }

        if b_ready {
            match pump(b, a, &mut buf)? {
                Some(n) => stats.downstream += n as u64,
                None => b_open = false,
            }
        }
    }

    Ok(stats)
}

/// Move one chunk. `None` once `from` is finished.
fn pump<F: HalfClose, T: HalfClose>(from: &F, to: &T, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let n = match from.read_some(buf) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Some(0)),
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => 0,
        Err(e) => return Err(e),
    };

    if n == 0 {
        let _ = to.shutdown_write();
        return Ok(None);
    }

    match to.write_all_bytes(&buf[..n]) {
        Ok(()) => Ok(Some(n)),
        Err(e) if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => {
            debug!("Peer went away mid-write: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
