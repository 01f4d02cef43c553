use log::{debug, info};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::connection::{Connection, Endpoint, SocketHandle};
use crate::device::DeviceRecord;
use crate::error::{MuxError, Result};
use crate::message::{self, DeviceEvent, Request};
use crate::tunnel::Tunnel;

/// Receive timeout for device listing.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for single-shot commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the usbmuxd daemon.
///
/// Each call opens its own connection. Tags are handed out from one counter so
/// no two connections made by this client share a tag.
#[derive(Debug)]
pub struct Usbmux {
    endpoint: Endpoint,
    tag: AtomicU32,
    list_timeout: Duration,
}

impl Default for Usbmux {
    fn default() -> Self {
        Self::new(Endpoint::platform_default())
    }
}

impl Usbmux {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, tag: AtomicU32::new(0), list_timeout: LIST_TIMEOUT }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn next_tag(&self) -> u32 {
        self.tag.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Open a fresh framed connection to the daemon.
    pub fn connect(&self) -> Result<Connection> {
        Connection::open(&self.endpoint, self.next_tag())
    }

    fn request(&self, request: Request, timeout: Option<Duration>) -> Result<plist::Dictionary> {
        let mut conn = self.connect()?;
        let reply = conn.send_and_receive(&request.to_payload(), timeout);
        conn.close();

        let reply = reply?;
        message::check_reply(&reply)?;
        Ok(reply)
    }

    /// Attached devices, one entry per UDID.
    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let reply = self.request(Request::ListDevices, Some(self.list_timeout)).map_err(|e| {
            if e.is_timeout() {
                MuxError::DeviceListTimeout
            } else {
                e
            }
        })?;

        let devices = message::parse_device_list(reply)?;
        debug!("Daemon reports {} device(s)", devices.len());
        Ok(devices)
    }

    pub fn device_udids(&self) -> Result<Vec<String>> {
        Ok(self.list_devices()?.into_iter().map(|d| d.udid).collect())
    }

    /// The daemon's system BUID. Stable for the daemon's lifetime.
    pub fn read_buid(&self) -> Result<String> {
        let reply = self.request(Request::ReadBuid, Some(COMMAND_TIMEOUT))?;
        message::parse_buid(&reply)
    }

    /// Subscribe to attach/detach events.
    ///
    /// The returned watcher keeps its connection open and yields events until
    /// it is closed, through [`DeviceWatcher::close`] or a handle from
    /// [`DeviceWatcher::close_handle`] used on another thread.
    pub fn watch_devices(&self) -> Result<DeviceWatcher> {
        let mut conn = self.connect()?;

        let ack = conn.send_and_receive(&Request::Listen.to_payload(), Some(COMMAND_TIMEOUT));
        if let Err(e) = ack.and_then(|ack| message::check_result(&ack)) {
            conn.close();
            return Err(e);
        }

        debug!("Listening for device events (tag {})", conn.tag());
        Ok(DeviceWatcher { conn })
    }

    /// Open a raw stream to `port` on the device.
    pub fn connect_device_port(&self, device_id: u64, port: u16) -> Result<Tunnel> {
        let mut conn = self.connect()?;
        let request = Request::Connect { device_id, port };
        debug!("Connecting to device {device_id} port {port} (sent as {})", message::daemon_port(port));

        let reply = conn.send_and_receive(&request.to_payload(), Some(COMMAND_TIMEOUT));
        if let Err(e) = reply.and_then(|reply| message::check_result(&reply)) {
            conn.close();
            return Err(e);
        }

        info!("Tunnel open to device {device_id} port {port}");
        Ok(Tunnel::new(conn.into_socket(), device_id, port))
    }
}

/// Endless stream of device events over one `Listen` connection.
///
/// Iteration ends only after the connection is closed. A receive or decode
/// error is yielded once and releases the connection.
#[derive(Debug)]
pub struct DeviceWatcher {
    conn: Connection,
}

impl DeviceWatcher {
    pub fn close_handle(&self) -> SocketHandle {
        self.conn.close_handle()
    }

    pub fn close(&self) {
        self.conn.close();
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

impl Iterator for DeviceWatcher {
    type Item = Result<DeviceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.conn.is_closed() {
            return None;
        }

        match self.conn.receive_full_message() {
            Ok(payload) => {
                let event = DeviceEvent::from_payload(payload);
                if event.is_err() {
                    self.conn.close();
                }
                Some(event)
            }
            Err(MuxError::UseAfterClose) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.conn.close();
    }
}
