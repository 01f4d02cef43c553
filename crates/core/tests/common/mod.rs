#![allow(dead_code)]

use ioscmd_core::protocol::{self, FrameHeader, FrameState, FULL_HEADER_LEN, PLIST_MESSAGE_TYPE};
use ioscmd_core::Endpoint;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

/// A request as the daemon saw it: header plus decoded payload.
#[derive(Debug, Clone)]
pub struct Received {
    pub header: FrameHeader,
    pub raw_body: Vec<u8>,
    pub payload: plist::Dictionary,
}

impl Received {
    pub fn str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(plist::Value::as_string)
    }

    pub fn uint(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(plist::Value::as_unsigned_integer)
    }
}

/// Server side of one client connection.
pub struct DaemonConn {
    pub stream: UnixStream,
    log: Arc<Mutex<Vec<Received>>>,
}

impl DaemonConn {
    pub fn read_request(&mut self) -> Received {
        let mut header = [0u8; FULL_HEADER_LEN];
        self.stream.read_exact(&mut header).unwrap();
        let header = FrameHeader::decode(&header);
        let mut raw_body = vec![0u8; header.payload_len().unwrap()];
        self.stream.read_exact(&mut raw_body).unwrap();
        let payload = protocol::decode_payload(&raw_body).unwrap();

        let received = Received { header, raw_body, payload };
        self.log.lock().unwrap().push(received.clone());
        received
    }

    /// Every daemon frame carries the full header.
    pub fn send(&mut self, payload: &plist::Dictionary) {
        let body = protocol::encode_payload(payload).unwrap();
        let frame =
            protocol::encode_frame(FrameState::AwaitingFirstFrame, PLIST_MESSAGE_TYPE, 0, &body).unwrap();
        self.stream.write_all(&frame).unwrap();
    }

    pub fn send_result(&mut self, number: u64) {
        self.send(&dict(&[("MessageType", "Result".into()), ("Number", number.into())]));
    }
}

pub struct FakeDaemon {
    _dir: TempDir,
    pub endpoint: Endpoint,
    log: Arc<Mutex<Vec<Received>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeDaemon {
    /// Serve `connections` clients in order, handing each to `handler`.
    pub fn spawn<F>(connections: usize, handler: F) -> Self
    where
        F: Fn(usize, DaemonConn) + Send + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usbmuxd.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let thread_log = log.clone();
        let handle = thread::spawn(move || {
            for index in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                handler(index, DaemonConn { stream, log: thread_log.clone() });
            }
        });

        Self { _dir: dir, endpoint: Endpoint::Unix(path), log, handle: Some(handle) }
    }

    pub fn requests(&self) -> Vec<Received> {
        self.log.lock().unwrap().clone()
    }

    pub fn join(mut self) -> Vec<Received> {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
        self.requests()
    }
}

pub fn dict(entries: &[(&str, plist::Value)]) -> plist::Dictionary {
    let mut dict = plist::Dictionary::new();
    for (key, value) in entries {
        dict.insert(key.to_string(), value.clone());
    }
    dict
}

pub fn device_properties(udid: &str, device_id: u64, connection_type: &str) -> plist::Dictionary {
    dict(&[
        ("UDID", udid.into()),
        ("SerialNumber", udid.into()),
        ("DeviceID", device_id.into()),
        ("ConnectionType", connection_type.into()),
        ("ProductID", 4776u64.into()),
    ])
}

/// A `ListDevices` reply with one attached entry per (udid, id, type).
pub fn device_list(devices: &[(&str, u64, &str)]) -> plist::Dictionary {
    let entries = devices
        .iter()
        .map(|(udid, id, kind)| {
            plist::Value::Dictionary(dict(&[
                ("DeviceID", (*id).into()),
                ("MessageType", "Attached".into()),
                ("Properties", plist::Value::Dictionary(device_properties(udid, *id, kind))),
            ]))
        })
        .collect();
    dict(&[("DeviceList", plist::Value::Array(entries))])
}
