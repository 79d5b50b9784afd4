//! Datagram ingress
//!
//! Receives raw datagrams, decodes them and routes each packet to its session.
//! Nothing a producer sends can stop the loop: malformed datagrams, unknown
//! sessions and full session queues are logged and dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::udp::{create_socket, UdpSocket};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::protocol::Packet;
use crate::session::SessionRegistry;

/// Ingress counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    unknown_session: AtomicU64,
    dropped: AtomicU64,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            unknown_session: self.unknown_session.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReceiverStatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub unknown_session: u64,
    pub dropped: u64,
}

/// Decode one datagram and hand it to its session
pub fn route_datagram(
    registry: &SessionRegistry,
    stats: &ReceiverStats,
    data: &[u8],
    echo: bool,
) -> Result<()> {
    stats.packets_received.fetch_add(1, Ordering::Relaxed);
    stats.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);

    let packet = Packet::decode(data).map_err(|e| {
        stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
        Error::from(e)
    })?;
    if echo {
        tracing::info!("{}", packet);
    }

    let Some(session) = registry.lookup(packet.session_id) else {
        stats.unknown_session.fetch_add(1, Ordering::Relaxed);
        return Err(Error::UnknownSession(packet.session_id));
    };

    session.push(packet).map_err(|e| {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        e
    })
}

/// UDP listener feeding the session registry
pub struct AudioReceiver {
    socket: UdpSocket,
    registry: Arc<SessionRegistry>,
    stats: Arc<ReceiverStats>,
    max_datagram_size: usize,
    echo_packets: bool,
}

impl AudioReceiver {
    /// Bind the data socket
    pub fn bind(config: &NetworkConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        let socket = create_socket(config)?;
        Ok(Self {
            socket,
            registry,
            stats: Arc::new(ReceiverStats::default()),
            max_datagram_size: config.max_datagram_size,
            echo_packets: config.echo_packets,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Shared handle to the ingress counters
    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Receive until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; self.max_datagram_size];
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!("Listening for data on {}", addr);
        }

        let mut backoff = RecvBackoff::default();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, addr)) => {
                        backoff.reset();
                        if self.echo_packets {
                            tracing::info!("Just saw a packet! {} bytes, address {}", n, addr);
                        }
                        if let Err(e) = route_datagram(&self.registry, &self.stats, &buf[..n], self.echo_packets) {
                            log_drop(&e, addr);
                        }
                    }
                    Err(e) => {
                        // ICMP errors from earlier sends surface here on some platforms
                        let delay = backoff.failure();
                        if backoff.should_log() {
                            tracing::warn!(consecutive = backoff.failures(), "UDP receive error: {}", e);
                        }
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }
        tracing::info!("UDP ingress stopped");
    }
}

/// Delay between retries after consecutive receive errors
#[derive(Debug, Default)]
struct RecvBackoff {
    failures: u32,
}

impl RecvBackoff {
    const BASE: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);
    /// Repeat the warning once per this many consecutive failures
    const LOG_EVERY: u32 = 100;

    /// Record a failure and return how long to wait before receiving again
    fn failure(&mut self) -> Duration {
        let exponent = self.failures.min(8);
        self.failures = self.failures.saturating_add(1);
        (Self::BASE * 2u32.pow(exponent)).min(Self::MAX)
    }

    fn reset(&mut self) {
        self.failures = 0;
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    fn should_log(&self) -> bool {
        self.failures == 1 || self.failures % Self::LOG_EVERY == 0
    }
}

fn log_drop(error: &Error, addr: SocketAddr) {
    match error {
        Error::Packet(e) => tracing::warn!(%addr, "Malformed packet: {}", e),
        Error::UnknownSession(id) => {
            tracing::warn!(%addr, session_id = id, "Received packet for nonexistent session")
        }
        Error::InboundFull(id) => tracing::debug!(session_id = id, "Session queue full, packet dropped"),
        e if e.is_recoverable() => tracing::debug!(%addr, "Packet dropped: {}", e),
        e => tracing::error!(%addr, "Packet dropped: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReaderConfig, SessionConfig};
    use std::time::Duration;

    #[test]
    fn test_recv_backoff_grows_and_resets() {
        let mut backoff = RecvBackoff::default();
        assert_eq!(backoff.failure(), Duration::from_millis(5));
        assert!(backoff.should_log());
        assert_eq!(backoff.failure(), Duration::from_millis(10));
        assert!(!backoff.should_log());

        for _ in 0..50 {
            backoff.failure();
        }
        assert_eq!(backoff.failure(), Duration::from_secs(1));

        let mut logged = 0;
        for _ in 0..300 {
            backoff.failure();
            if backoff.should_log() {
                logged += 1;
            }
        }
        assert_eq!(logged, 3);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.failure(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_route_valid_packet() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let session = registry.create_default_session().unwrap();
        let stats = ReceiverStats::default();

        let packet = Packet::new(session.id(), 1, 0, vec![1u8, 2, 3]);
        route_datagram(&registry, &stats, &packet.encode().unwrap(), false).unwrap();

        assert_eq!(session.stats().packets_received, 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 1);
        assert_eq!(snapshot.bytes_received, 27);
    }

    #[tokio::test]
    async fn test_route_malformed_packet() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let stats = ReceiverStats::default();

        let err = route_datagram(&registry, &stats, &[0u8; 10], false).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
        assert_eq!(stats.snapshot().invalid_packets, 1);
    }

    #[tokio::test]
    async fn test_route_unknown_session() {
        let registry = SessionRegistry::new(SessionConfig::default());
        let stats = ReceiverStats::default();

        let packet = Packet::new(12345, 0, 0, vec![0u8; 4]);
        let err = route_datagram(&registry, &stats, &packet.encode().unwrap(), false).unwrap_err();
        assert!(matches!(err, Error::UnknownSession(12345)));
        assert_eq!(stats.snapshot().unknown_session, 1);
    }

    #[tokio::test]
    async fn test_receiver_survives_bad_datagrams() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let session = registry.create_default_session().unwrap();
        let mut reader = session.subscribe(&ReaderConfig::default());

        let config = NetworkConfig {
            bind_address: "127.0.0.1".into(),
            udp_port: 0,
            ..Default::default()
        };
        let receiver = AudioReceiver::bind(&config, registry.clone()).unwrap();
        let addr = receiver.local_addr().unwrap();
        let stats = receiver.stats();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(receiver.run(stop_rx));

        let producer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        producer.send_to(b"garbage", addr).await.unwrap();
        producer
            .send_to(&Packet::new(999, 0, 0, vec![0u8; 2]).encode().unwrap(), addr)
            .await
            .unwrap();
        producer
            .send_to(&Packet::new(session.id(), 0, 0, vec![7u8; 4]).encode().unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), reader.read_available(&mut buf))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[7u8; 4]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 3);
        assert_eq!(snapshot.invalid_packets, 1);
        assert_eq!(snapshot.unknown_session, 1);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }
}
