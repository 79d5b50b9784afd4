//! Transcoding of reconstructed raw audio into a delivery format
//!
//! Payload bytes are opaque to the relay; conversion is delegated to an
//! external process.

pub mod transcoder;

pub use transcoder::{build_args, input_format, Transcoder};
