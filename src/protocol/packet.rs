//! Wire packet codec
//!
//! Every datagram carries exactly one packet, laid out little-endian:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────┬──────────────┬─────────────┐
//! │ session_id │ timestamp  │ sample_position │ payload_size │ payload ... │
//! │   u64      │   i64 (ns) │      i32        │     i32      │ size bytes  │
//! └────────────┴────────────┴─────────────────┴──────────────┴─────────────┘
//! ```
//!
//! There is no checksum and no version byte; this is the only layout accepted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use super::SessionId;
use crate::error::PacketError;

/// Size of the fixed packet header in bytes
pub const HEADER_SIZE: usize = 8 + 8 + 4 + 4;

/// A decoded audio packet
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Owning session
    pub session_id: SessionId,
    /// Producer clock in nanoseconds (informational)
    pub timestamp: i64,
    /// Byte offset of the first payload byte in the producer's stream
    pub sample_position: i32,
    /// Opaque audio bytes
    pub payload: Bytes,
}

impl Packet {
    pub fn new(
        session_id: SessionId,
        timestamp: i64,
        sample_position: i32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            session_id,
            timestamp,
            sample_position,
            payload: payload.into(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Stream position one past the last payload byte
    pub fn end_position(&self) -> i64 {
        self.sample_position as i64 + self.payload.len() as i64
    }

    /// Size of the encoded packet on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize into the wire layout
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let size = i32::try_from(self.payload.len())
            .map_err(|_| PacketError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u64_le(self.session_id);
        buf.put_i64_le(self.timestamp);
        buf.put_i32_le(self.sample_position);
        buf.put_i32_le(size);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a packet from untrusted datagram bytes
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let mut header = &data[..HEADER_SIZE];
        let session_id = header.get_u64_le();
        let timestamp = header.get_i64_le();
        let sample_position = header.get_i32_le();
        let declared = header.get_i32_le();

        let declared = usize::try_from(declared).map_err(|_| PacketError::NegativeSize(declared))?;
        let body = &data[HEADER_SIZE..];
        if body.len() != declared {
            return Err(PacketError::SizeMismatch {
                declared,
                actual: body.len(),
            });
        }

        Ok(Self {
            session_id,
            timestamp,
            sample_position,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("session_id", &self.session_id)
            .field("timestamp", &self.timestamp)
            .field("sample_position", &self.sample_position)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet {{ id: {}, time: {}, position: {}, payload: {} bytes }}",
            self.session_id,
            self.timestamp,
            self.sample_position,
            self.payload.len()
        )
    }
}
