//! Error types for the audio relay

use thiserror::Error;

use crate::protocol::SessionId;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} inbound queue is full")]
    InboundFull(SessionId),

    #[error("Session {0} is stopped")]
    SessionStopped(SessionId),

    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("No unused session id after {0} attempts")]
    IdSpaceExhausted(usize),

    #[error("Transcoder error: {0}")]
    Transcoder(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire decoding errors
///
/// Every variant means the datagram is malformed and should be dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Malformed packet: {0} bytes is shorter than the header")]
    TooShort(usize),

    #[error("Malformed packet: negative payload size {0}")]
    NegativeSize(i32),

    #[error("Malformed packet: incorrect payload size; claimed {declared} bytes, saw {actual} bytes")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Payload too large to encode: {0} bytes")]
    PayloadTooLarge(usize),
}

impl Error {
    /// Whether this error only affects a single datagram or request
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::EntropyUnavailable(_) | Error::IdSpaceExhausted(_) | Error::Io(_)
        )
    }
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;
