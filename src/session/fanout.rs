//! Bounded fan-out of one packet stream to many listeners
//!
//! Each listener gets a delivery worker fed through a small backlog queue. The
//! dispatcher only ever does a non-blocking hand-off into that backlog; the worker
//! then waits at most `timeout` for the listener's channel to accept each packet.
//! A listener that stalls forfeits packets, one per timeout, without slowing the
//! dispatcher or any other listener down.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

use crate::protocol::Packet;

/// Identifier of a listener within one session
pub type ListenerId = u64;

/// Per-listener delivery counters
#[derive(Debug, Default)]
pub struct ListenerStats {
    delivered: AtomicU64,
    forfeited: AtomicU64,
}

impl ListenerStats {
    /// Packets accepted by the listener channel
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Packets dropped for this listener because it was too slow
    pub fn forfeited(&self) -> u64 {
        self.forfeited.load(Ordering::Relaxed)
    }
}

struct Listener {
    id: ListenerId,
    backlog: mpsc::Sender<Packet>,
    stats: Arc<ListenerStats>,
}

struct Listeners {
    list: Vec<Listener>,
    closed: bool,
}

/// Registered listeners of one session
pub struct FanOut {
    listeners: RwLock<Listeners>,
    next_id: AtomicU64,
    backlog: usize,
    timeout: Duration,
    forfeited_total: Arc<AtomicU64>,
}

impl FanOut {
    pub fn new(backlog: usize, timeout: Duration) -> Self {
        Self {
            listeners: RwLock::new(Listeners {
                list: Vec::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(0),
            backlog: backlog.max(1),
            timeout,
            forfeited_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register `target` as a listener and start its delivery worker
    ///
    /// Returns `None` once the fan-out has been closed.
    pub fn add(&self, target: mpsc::Sender<Packet>) -> Option<ListenerId> {
        let mut listeners = self.listeners.write();
        if listeners.closed {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (backlog, queued) = mpsc::channel(self.backlog);
        let stats = Arc::new(ListenerStats::default());

        tokio::spawn(deliver(
            id,
            queued,
            target,
            self.timeout,
            stats.clone(),
            self.forfeited_total.clone(),
        ));

        listeners.list.push(Listener { id, backlog, stats });
        Some(id)
    }

    /// Deregister a listener; removing an unknown id is a no-op
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.list.len();
        listeners.list.retain(|l| l.id != id);
        listeners.list.len() != before
    }

    /// Drop every listener and refuse new ones
    pub fn close(&self) -> usize {
        let mut listeners = self.listeners.write();
        listeners.closed = true;
        let removed = listeners.list.len();
        listeners.list.clear();
        removed
    }

    /// Hand `packet` to every listener without waiting; returns how many took it
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let listeners = self.listeners.read();
        let mut accepted = 0;

        for listener in &listeners.list {
            match listener.backlog.try_send(packet.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(dropped)) => {
                    listener.stats.forfeited.fetch_add(1, Ordering::Relaxed);
                    self.forfeited_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        listener = listener.id,
                        position = dropped.sample_position,
                        "Listener backlog full, packet forfeited"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        accepted
    }

    pub fn len(&self) -> usize {
        self.listeners.read().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.listeners.read().closed
    }

    /// Counters of a registered listener
    pub fn listener_stats(&self, id: ListenerId) -> Option<Arc<ListenerStats>> {
        self.listeners
            .read()
            .list
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.stats.clone())
    }

    /// Packets forfeited across all listeners, past and present
    pub fn forfeited(&self) -> u64 {
        self.forfeited_total.load(Ordering::Relaxed)
    }
}

/// Delivery worker: forwards queued packets in order, each with a bounded wait
async fn deliver(
    id: ListenerId,
    mut queued: mpsc::Receiver<Packet>,
    target: mpsc::Sender<Packet>,
    timeout: Duration,
    stats: Arc<ListenerStats>,
    forfeited_total: Arc<AtomicU64>,
) {
    while let Some(packet) = queued.recv().await {
        match target.send_timeout(packet, timeout).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(SendTimeoutError::Timeout(packet)) => {
                stats.forfeited.fetch_add(1, Ordering::Relaxed);
                forfeited_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    listener = id,
                    position = packet.sample_position,
                    "Slow listener, packet forfeited"
                );
            }
            Err(SendTimeoutError::Closed(_)) => break,
        }
    }
    tracing::trace!(listener = id, "Delivery worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(position: i32) -> Packet {
        Packet::new(9, 0, position, vec![0u8; 8])
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_listener_does_not_block_others() {
        let timeout = Duration::from_millis(100);
        let fanout = FanOut::new(64, timeout);

        // Never drained, room for a single packet
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(64);
        let slow = fanout.add(slow_tx).unwrap();
        let fast = fanout.add(fast_tx).unwrap();

        for position in 0..4 {
            assert_eq!(fanout.broadcast(&packet(position * 8)), 2);
        }

        for expected in 0..4 {
            let received = fast_rx.recv().await.unwrap();
            assert_eq!(received.sample_position, expected * 8);
        }

        // First packet fills the slow channel, each later one costs one timeout
        tokio::time::sleep(timeout * 3 + Duration::from_millis(10)).await;

        let slow_stats = fanout.listener_stats(slow).unwrap();
        assert_eq!(slow_stats.delivered(), 1);
        assert_eq!(slow_stats.forfeited(), 3);

        let fast_stats = fanout.listener_stats(fast).unwrap();
        assert_eq!(fast_stats.delivered(), 4);
        assert_eq!(fast_stats.forfeited(), 0);
        assert_eq!(fanout.forfeited(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_forfeit_per_timeout() {
        let timeout = Duration::from_millis(100);
        let fanout = FanOut::new(64, timeout);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = fanout.add(slow_tx).unwrap();

        for position in 0..5 {
            fanout.broadcast(&packet(position));
        }

        let stats = fanout.listener_stats(slow).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(stats.forfeited(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.forfeited(), 2);
    }

    #[tokio::test]
    async fn test_full_backlog_forfeits_immediately() {
        let fanout = FanOut::new(1, Duration::from_secs(60));
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = fanout.add(slow_tx).unwrap();

        // Worker holds at most one in flight plus one queued
        let mut accepted = 0;
        for position in 0..10 {
            accepted += fanout.broadcast(&packet(position));
            tokio::task::yield_now().await;
        }

        let stats = fanout.listener_stats(slow).unwrap();
        assert!(accepted < 10);
        assert_eq!(stats.forfeited(), (10 - accepted) as u64);
    }

    #[tokio::test]
    async fn test_remove_closes_listener_channel() {
        let fanout = FanOut::new(8, Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(8);
        let id = fanout.add(tx).unwrap();

        assert!(fanout.remove(id));
        assert!(!fanout.remove(id));
        assert!(fanout.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_fanout_rejects_listeners() {
        let fanout = FanOut::new(8, Duration::from_secs(1));
        let (tx, _rx) = mpsc::channel(8);
        fanout.add(tx).unwrap();

        assert_eq!(fanout.close(), 1);
        let (tx, _rx) = mpsc::channel(8);
        assert!(fanout.add(tx).is_none());
        assert!(fanout.is_closed());
    }
}
