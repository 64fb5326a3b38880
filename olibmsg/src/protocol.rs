//! Protocol framing for the O instrument
//!
//! Every message on a TCP connection is a 6 byte header followed by a JSON
//! payload. The header holds the protocol version, the message type and the
//! payload length as a big endian u32.

use std::io::{Read, Write};
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::commands::Request;
use crate::error::{OError, OResult};
use crate::replies::Reply;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum payload size in bytes
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Size of the encoded header
pub const HEADER_SIZE: usize = 6;

/// Message type carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Reply,
}

impl MessageType {
    fn to_u8(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Reply => 1,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Reply),
            _ => None,
        }
    }
}

/// Protocol message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub msg_type: MessageType,
    /// Payload length, excluding the header
    pub length: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload_len: usize) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            length: payload_len as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [self.version, self.msg_type.to_u8(), len[0], len[1], len[2], len[3]]
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> OResult<Self> {
        if bytes[0] != PROTOCOL_VERSION {
            return Err(OError::protocol(format!("Unsupported protocol version {}", bytes[0])));
        }
        let msg_type = MessageType::from_u8(bytes[1])
            .ok_or_else(|| OError::protocol(format!("Unknown message type {}", bytes[1])))?;
        let length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        if length as usize > MAX_MESSAGE_SIZE {
            return Err(OError::protocol(format!("Message of {} bytes exceeds maximum", length)));
        }
        Ok(Self {
            version: bytes[0],
            msg_type,
            length,
        })
    }
}

/// Write one framed message
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg_type: MessageType, message: &T) -> OResult<()> {
    let data = serde_json::to_vec(message)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(OError::protocol(format!("Message of {} bytes exceeds maximum", data.len())));
    }
    let header = MessageHeader::new(msg_type, data.len());
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message of the expected type
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R, expected: MessageType) -> OResult<T> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = MessageHeader::from_bytes(&header_bytes)?;
    if header.msg_type != expected {
        return Err(OError::protocol(format!(
            "Expected {:?} message, received {:?}",
            expected, header.msg_type
        )));
    }

    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

pub fn write_request<W: Write, C: Serialize>(writer: &mut W, request: &Request<C>) -> OResult<()> {
    write_message(writer, MessageType::Request, request)
}

pub fn read_request<R: Read, C: DeserializeOwned>(reader: &mut R) -> OResult<Request<C>> {
    read_message(reader, MessageType::Request)
}

pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> OResult<()> {
    write_message(writer, MessageType::Reply, reply)
}

pub fn read_reply<R: Read>(reader: &mut R) -> OResult<Reply> {
    read_message(reader, MessageType::Reply)
}
