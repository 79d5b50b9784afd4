//! HTTP signalling and audio egress

pub mod handlers;
pub mod server;

pub use server::{router, AppState, WebServer};
