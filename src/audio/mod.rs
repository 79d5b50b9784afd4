//! Audio buffering

pub mod buffer;

pub use buffer::{Offer, ReorderBuffer, ReorderBufferStats};
