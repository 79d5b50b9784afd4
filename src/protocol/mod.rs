//! Wire and signalling types shared by producers, the relay and HTTP clients

pub mod packet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use packet::{Packet, HEADER_SIZE};

use crate::constants::{DEFAULT_BYTES_PER_SAMPLE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Session identifier as carried on the wire
pub type SessionId = u64;

/// Raw audio format of a session, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channels: u16,
}

impl AudioInfo {
    pub fn new(sample_rate: u32, bytes_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bytes_per_sample,
            channels,
        }
    }

    /// Bytes of audio produced per second
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_sample as u64 * self.channels as u64
    }
}

impl Default for AudioInfo {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_BYTES_PER_SAMPLE, DEFAULT_CHANNELS)
    }
}

/// Response to a signalling connect request: where and under which id to send packets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub ip: String,
    pub port: u16,
    pub session_id: SessionId,
    pub audio_info: AudioInfo,
}

/// Point-in-time view of a session for listing endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub audio_info: AudioInfo,
    pub created_at: DateTime<Utc>,
    pub listeners: usize,
    pub packets_received: u64,
    pub running: bool,
}
