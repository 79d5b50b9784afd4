//! Session management: registry, per-session fan-out and per-consumer readers

pub mod fanout;
pub mod reader;
pub mod registry;
pub mod stream;

pub use fanout::{FanOut, ListenerId, ListenerStats};
pub use reader::{ReaderStats, StreamReader};
pub use registry::{IdGenerator, OsRngIdGenerator, SessionRegistry};
pub use stream::{Session, SessionState, SessionStats};
