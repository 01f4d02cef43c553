//! Request and reply shapes for each daemon command.

use crate::device::{dedup_by_udid, required_uint, DeviceRecord};
use crate::error::{MuxError, ReplyCode, Result};

pub const CLIENT_VERSION: &str = "libusbmuxd 1.1.0";
pub const PROGRAM_NAME: &str = "ioscmd";
pub const LIB_USBMUX_VERSION: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ListDevices,
    ReadBuid,
    Listen,
    Connect { device_id: u64, port: u16 },
}

impl Request {
    pub fn message_type(&self) -> &'static str {
        match self {
            Request::ListDevices => "ListDevices",
            Request::ReadBuid => "ReadBUID",
            Request::Listen => "Listen",
            Request::Connect { .. } => "Connect",
        }
    }

    pub fn to_payload(&self) -> plist::Dictionary {
        let mut dict = plist::Dictionary::new();
        dict.insert("MessageType".to_string(), self.message_type().into());
        dict.insert("ClientVersionString".to_string(), CLIENT_VERSION.into());
        dict.insert("ProgName".to_string(), PROGRAM_NAME.into());
        dict.insert("kLibUSBMuxVersion".to_string(), LIB_USBMUX_VERSION.into());

        if let Request::Connect { device_id, port } = *self {
            dict.insert("DeviceID".to_string(), device_id.into());
            dict.insert("PortNumber".to_string(), u64::from(daemon_port(port)).into());
        }

        dict
    }
}

/// The daemon reads `PortNumber` byte-swapped (22 goes out as 0x1600). The
/// swap is unconditional, independent of host endianness.
pub fn daemon_port(port: u16) -> u16 {
    port.swap_bytes()
}

/// Fail on a non-zero `Number`. A reply without `Number` counts as success.
pub fn check_reply(reply: &plist::Dictionary) -> Result<()> {
    match reply.get("Number") {
        None => Ok(()),
        Some(value) => match value.as_unsigned_integer() {
            Some(0) => Ok(()),
            Some(n) => Err(MuxError::Reply { code: ReplyCode::from_number(n) }),
            None => Err(MuxError::Malformed { field: "Number" }),
        },
    }
}

pub fn parse_device_list(reply: plist::Dictionary) -> Result<Vec<DeviceRecord>> {
    let entries = match reply.get("DeviceList") {
        Some(plist::Value::Array(entries)) => entries.clone(),
        _ => return Err(MuxError::Malformed { field: "DeviceList" }),
    };

    let records = entries
        .into_iter()
        .map(|entry| {
            let properties = entry
                .into_dictionary()
                .and_then(|mut e| e.remove("Properties"))
                .and_then(plist::Value::into_dictionary)
                .ok_or(MuxError::Malformed { field: "Properties" })?;
            DeviceRecord::from_properties(properties)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(dedup_by_udid(records))
}

pub fn parse_buid(reply: &plist::Dictionary) -> Result<String> {
    reply
        .get("BUID")
        .and_then(plist::Value::as_string)
        .map(str::to_string)
        .ok_or(MuxError::Malformed { field: "BUID" })
}

/// A device attach/detach notification from a `Listen` connection.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Attached { device_id: u64, properties: Option<DeviceRecord> },
    Detached { device_id: u64 },
    Paired { device_id: u64 },
}

impl DeviceEvent {
    pub fn from_payload(mut payload: plist::Dictionary) -> Result<Self> {
        let device_id = required_uint(&payload, "DeviceID")?;
        let kind = payload
            .get("MessageType")
            .and_then(plist::Value::as_string)
            .map(str::to_string)
            .ok_or(MuxError::Malformed { field: "MessageType" })?;

        match kind.as_str() {
            "Attached" => {
                let properties = match payload.remove("Properties") {
                    None => None,
                    Some(value) => {
                        let dict = value
                            .into_dictionary()
                            .ok_or(MuxError::Malformed { field: "Properties" })?;
                        Some(DeviceRecord::from_properties(dict)?)
                    }
                };
                Ok(DeviceEvent::Attached { device_id, properties })
            }
            "Detached" => Ok(DeviceEvent::Detached { device_id }),
            "Paired" => Ok(DeviceEvent::Paired { device_id }),
            _ => Err(MuxError::Malformed { field: "MessageType" }),
        }
    }

    pub fn device_id(&self) -> u64 {
        match self {
            DeviceEvent::Attached { device_id, .. }
            | DeviceEvent::Detached { device_id }
            | DeviceEvent::Paired { device_id } => *device_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::Attached { .. } => "Attached",
            DeviceEvent::Detached { .. } => "Detached",
            DeviceEvent::Paired { .. } => "Paired",
        }
    }
}

/// Reply to `Listen` or `Connect`: `MessageType = Result` plus `Number`.
pub fn check_result(reply: &plist::Dictionary) -> Result<()> {
    check_reply(reply)?;
    match reply.get("MessageType").and_then(plist::Value::as_string) {
        Some("Result") => Ok(()),
        _ => Err(MuxError::Malformed { field: "MessageType" }),
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
