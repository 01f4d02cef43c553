//! Wire framing for the usbmuxd plist protocol.
//!
//! The first frame on a connection carries a 16-byte header
//! `[length][version][message type][tag]` (native endian, `length` includes
//! the header itself). Every later frame is a 4-byte big-endian payload
//! length followed by the payload.

use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Cursor};

use crate::error::{MuxError, Result};

pub const FULL_HEADER_LEN: usize = 16;
pub const SHORT_HEADER_LEN: usize = 4;

/// Largest payload accepted from the daemon.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 1;
/// Message type for plist payloads.
pub const PLIST_MESSAGE_TYPE: u32 = 8;

/// Which header the next frame in one direction uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingFirstFrame,
    Streaming,
}

impl FrameState {
    pub fn header_len(self) -> usize {
        match self {
            FrameState::AwaitingFirstFrame => FULL_HEADER_LEN,
            FrameState::Streaming => SHORT_HEADER_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub version: u32,
    pub message_type: u32,
    pub tag: u32,
}

impl FrameHeader {
    pub fn for_payload(payload_len: usize, message_type: u32, tag: u32) -> Result<Self> {
        let length = payload_len
            .checked_add(FULL_HEADER_LEN)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| MuxError::Send(too_large(payload_len)))?;

        Ok(Self { length, version: PROTOCOL_VERSION, message_type, tag })
    }

    /// Payload bytes that follow this header.
    pub fn payload_len(&self) -> Result<usize> {
        (self.length as usize).checked_sub(FULL_HEADER_LEN).ok_or_else(|| {
            MuxError::Receive(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} is shorter than its header", self.length),
            ))
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_ne(self.length);
        buf.put_u32_ne(self.version);
        buf.put_u32_ne(self.message_type);
        buf.put_u32_ne(self.tag);
    }

    pub fn decode(mut bytes: &[u8]) -> Self {
        Self {
            length: bytes.get_u32_ne(),
            version: bytes.get_u32_ne(),
            message_type: bytes.get_u32_ne(),
            tag: bytes.get_u32_ne(),
        }
    }
}

/// Reject payload lengths above [`MAX_PAYLOAD_LEN`] before allocating.
pub fn check_payload_len(len: usize) -> Result<usize> {
    if len > MAX_PAYLOAD_LEN {
        return Err(MuxError::Receive(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {len} bytes exceeds {MAX_PAYLOAD_LEN}"),
        )));
    }
    Ok(len)
}

fn too_large(len: usize) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("payload of {len} bytes exceeds frame limit"))
}

/// Serialize a payload dictionary as an XML property list.
pub fn encode_payload(payload: &plist::Dictionary) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    plist::Value::Dictionary(payload.clone()).to_writer_xml(&mut body).map_err(MuxError::Codec)?;
    Ok(body)
}

/// Parse a property list (XML or binary) whose root must be a dictionary.
pub fn decode_payload(body: &[u8]) -> Result<plist::Dictionary> {
    plist::Value::from_reader(Cursor::new(body))
        .map_err(MuxError::Codec)?
        .into_dictionary()
        .ok_or(MuxError::Malformed { field: "<root>" })
}

/// Build a complete frame for the given direction state.
pub fn encode_frame(state: FrameState, message_type: u32, tag: u32, body: &[u8]) -> Result<Vec<u8>> {
    let mut frame = BytesMut::with_capacity(state.header_len() + body.len());

    match state {
        FrameState::AwaitingFirstFrame => {
            FrameHeader::for_payload(body.len(), message_type, tag)?.encode(&mut frame);
        }
        FrameState::Streaming => {
            let len = u32::try_from(body.len()).map_err(|_| MuxError::Send(too_large(body.len())))?;
            frame.put_u32(len);
        }
    }

    frame.extend_from_slice(body);
    Ok(frame.to_vec())
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
