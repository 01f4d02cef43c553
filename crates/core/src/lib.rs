//! Core functionality for ioscmd
//!
//! Talks to the usbmuxd daemon, opens tunnels to device ports and relays
//! interactive shell sessions between a local terminal and a device.

#[cfg(not(unix))]
compile_error!("ioscmd-core needs a Unix host: it uses Unix sockets, termios and poll");

pub mod connection;
pub mod device;
pub mod error;
pub mod interactive;
pub mod message;
pub mod mux;
mod poll;
pub mod protocol;
pub mod relay;
pub mod terminal;
pub mod tunnel;

// Re-export commonly used types
pub use connection::{Connection, Endpoint, SocketHandle, Stream};
pub use device::{select_device, ConnectionType, DeviceRecord};
pub use error::{MuxError, ReplyCode, Result};
pub use interactive::{run_session, ShellChannel};
pub use message::{DeviceEvent, Request};
pub use mux::{DeviceWatcher, Usbmux};
pub use relay::{forward, ForwardStats, RelayListener, RelayService};
pub use terminal::{Terminal, WindowSize};
pub use tunnel::{HalfClose, Tunnel};
