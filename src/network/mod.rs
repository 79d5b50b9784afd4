//! Network subsystem for UDP audio ingress

pub mod receiver;
pub mod udp;

pub use receiver::{route_datagram, AudioReceiver, ReceiverStats, ReceiverStatsSnapshot};
pub use udp::{create_socket, UdpSocket};
