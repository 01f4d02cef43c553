use std::fmt;
use std::io;

use thiserror::Error;

/// Reply codes the daemon uses to reject a request.
///
/// Mirrors the fixed enumeration in usbmuxd's `usbmuxd-proto.h`. Anything
/// outside the known set is kept as `Other` so it still surfaces as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    BadCommand,
    BadDevice,
    ConnectionRefused,
    BadVersion,
    Other(u64),
}

impl ReplyCode {
    /// Map a non-zero `Number` field to a reply code.
    pub fn from_number(number: u64) -> Self {
        match number {
            1 => ReplyCode::BadCommand,
            2 => ReplyCode::BadDevice,
            3 => ReplyCode::ConnectionRefused,
            6 => ReplyCode::BadVersion,
            n => ReplyCode::Other(n),
        }
    }

    pub fn number(&self) -> u64 {
        match self {
            ReplyCode::BadCommand => 1,
            ReplyCode::BadDevice => 2,
            ReplyCode::ConnectionRefused => 3,
            ReplyCode::BadVersion => 6,
            ReplyCode::Other(n) => *n,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyCode::BadCommand => write!(f, "bad command (1)"),
            ReplyCode::BadDevice => write!(f, "bad device (2)"),
            ReplyCode::ConnectionRefused => write!(f, "connection refused (3)"),
            ReplyCode::BadVersion => write!(f, "bad version (6)"),
            ReplyCode::Other(n) => write!(f, "unknown reply code ({n})"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("unable to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send frame")]
    Send(#[source] io::Error),

    #[error("failed to receive frame")]
    Receive(#[source] io::Error),

    #[error("connection already closed")]
    UseAfterClose,

    #[error("payload is not a valid property list")]
    Codec(#[source] plist::Error),

    #[error("reply field `{field}` is missing or has the wrong type")]
    Malformed { field: &'static str },

    #[error("daemon rejected request: {code}")]
    Reply { code: ReplyCode },

    #[error("device {udid} not found")]
    DeviceNotFound { udid: String },

    #[error("{count} devices attached, specify one with a UDID")]
    AmbiguousDevice { count: usize },

    #[error("no device attached")]
    NoDevice,

    #[error("timed out waiting for the device list")]
    DeviceListTimeout,
}

impl MuxError {
    /// True when a receive failed because the socket timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            MuxError::Receive(e) => {
                matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
