//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

pub use tokio::net::UdpSocket;

/// Resolve the configured bind address
pub fn bind_addr(config: &NetworkConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.bind_address, config.udp_port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid UDP bind address: {}", e)))
}

/// Create a non-blocking UDP socket with address reuse and an enlarged receive buffer
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket> {
    let addr = bind_addr(config)?;
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Could not set UDP receive buffer to {} bytes: {}", config.recv_buffer_size, e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_socket_on_ephemeral_port() {
        let config = NetworkConfig {
            bind_address: "127.0.0.1".into(),
            udp_port: 0,
            ..Default::default()
        };
        let socket = create_socket(&config).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bad_bind_address() {
        let config = NetworkConfig {
            bind_address: "not an address".into(),
            ..Default::default()
        };
        assert!(matches!(bind_addr(&config), Err(Error::Config(_))));
    }
}
