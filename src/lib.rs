//! # Cloud Audio Relay
//!
//! Real-time audio relay: producers push sequence-numbered audio packets over UDP,
//! consumers pull a reconstructed, gap-skipping byte stream over HTTP.
//!
//! ## Architecture Overview
//!
//! ```text
//!   Producer A          Producer B
//!       │ UDP               │ UDP
//!       ▼                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            UDP Ingress (network::receiver)                   │
//! │   decode packet ─► registry lookup ─► session inbound        │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session (session::stream)        one per producer           │
//! │  ┌────────────┐                                              │
//! │  │ Dispatcher │──► delivery worker ──► listener 0 ─┐         │
//! │  │            │──► delivery worker ──► listener 1 ─┼─┐       │
//! │  └────────────┘    (bounded wait per packet)       │ │       │
//! └────────────────────────────────────────────────────┼─┼───────┘
//!                                                      ▼ ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StreamReader (session::reader)    one per consumer          │
//! │   drain task ─► ReorderBuffer (audio::buffer) ─► read()      │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//!            Transcoder (ffmpeg) ─► HTTP /audio/{id} (ui)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, PacketError, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for new sessions
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default sample width in bytes (16-bit)
    pub const DEFAULT_BYTES_PER_SAMPLE: u16 = 2;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default UDP port for audio packets
    pub const DEFAULT_UDP_PORT: u16 = 2445;

    /// Default HTTP port for signalling and egress
    pub const DEFAULT_HTTP_PORT: u16 = 2444;

    /// Receive buffer per datagram
    pub const MAX_DATAGRAM_SIZE: usize = 5000;

    /// Inbound queue depth per session
    pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

    /// Time a listener may stall before forfeiting a packet
    pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 1000;

    /// Packets queued per listener ahead of its delivery worker
    pub const DEFAULT_DELIVERY_BACKLOG: usize = 64;

    /// Listener channel depth per reader
    pub const DEFAULT_READER_BUFFER_LENGTH: usize = 10;

    /// Idle re-check interval for waiting readers
    pub const DEFAULT_READER_POLL_MS: u64 = 20;
}
