use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::error::{MuxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Network,
}

impl ConnectionType {
    /// The daemon reports `USB` or `Network`; matching is case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "usb" => Some(ConnectionType::Usb),
            "network" => Some(ConnectionType::Network),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Usb => write!(f, "usb"),
            ConnectionType::Network => write!(f, "network"),
        }
    }
}

/// Snapshot of one attached device as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRecord {
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "DeviceID")]
    pub device_id: u64,
    pub connection_type: ConnectionType,
    #[serde(rename = "ProductID", skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(rename = "LocationID", skip_serializing_if = "Option::is_none")]
    pub location_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_speed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_address: Option<String>,
    /// Every property the daemon sent, untouched.
    #[serde(skip)]
    pub properties: plist::Dictionary,
}

impl DeviceRecord {
    /// Build a record from a `Properties` dictionary.
    ///
    /// `DeviceID` and `ConnectionType` are required. The identifier is taken
    /// from `UDID`, falling back to `SerialNumber` which attach events carry
    /// instead.
    pub fn from_properties(properties: plist::Dictionary) -> Result<Self> {
        let udid = optional_str(&properties, "UDID")
            .or_else(|| optional_str(&properties, "SerialNumber"))
            .ok_or(MuxError::Malformed { field: "UDID" })?;
        let device_id = required_uint(&properties, "DeviceID")?;
        let connection_type = properties
            .get("ConnectionType")
            .and_then(plist::Value::as_string)
            .and_then(ConnectionType::parse)
            .ok_or(MuxError::Malformed { field: "ConnectionType" })?;

        Ok(Self {
            udid,
            device_id,
            connection_type,
            product_id: optional_uint(&properties, "ProductID"),
            product_type: optional_str(&properties, "ProductType"),
            product_version: optional_str(&properties, "ProductVersion"),
            serial_number: optional_str(&properties, "SerialNumber"),
            location_id: optional_uint(&properties, "LocationID"),
            connection_speed: optional_uint(&properties, "ConnectionSpeed"),
            wifi_address: optional_str(&properties, "WiFiAddress"),
            properties,
        })
    }
}

pub(crate) fn required_uint(dict: &plist::Dictionary, field: &'static str) -> Result<u64> {
    optional_uint(dict, field).ok_or(MuxError::Malformed { field })
}

pub(crate) fn optional_uint(dict: &plist::Dictionary, field: &str) -> Option<u64> {
    dict.get(field).and_then(plist::Value::as_unsigned_integer)
}

pub(crate) fn optional_str(dict: &plist::Dictionary, field: &str) -> Option<String> {
    dict.get(field).and_then(plist::Value::as_string).map(str::to_string)
}

/// Collapse records sharing a UDID. A later record replaces an earlier one
/// but keeps the earlier one's position.
pub fn dedup_by_udid(records: impl IntoIterator<Item = DeviceRecord>) -> Vec<DeviceRecord> {
    let mut result: Vec<DeviceRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        match index.get(&record.udid) {
            Some(&i) => result[i] = record,
            None => {
                index.insert(record.udid.clone(), result.len());
                result.push(record);
            }
        }
    }

    result
}

/// Pick the device to talk to.
///
/// With a UDID it must match exactly one listed device. Without one there
/// must be exactly one device attached.
pub fn select_device<'a>(devices: &'a [DeviceRecord], udid: Option<&str>) -> Result<&'a DeviceRecord> {
    match udid {
        Some(udid) => devices
            .iter()
            .find(|d| d.udid == udid)
            .ok_or_else(|| MuxError::DeviceNotFound { udid: udid.to_string() }),
        None => match devices {
            [] => Err(MuxError::NoDevice),
            [only] => Ok(only),
            _ => Err(MuxError::AmbiguousDevice { count: devices.len() }),
        },
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
