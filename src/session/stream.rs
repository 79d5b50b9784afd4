//! A single producer's audio stream and its dispatcher task

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, mpsc::error::TrySendError, watch};

use super::fanout::{FanOut, ListenerId, ListenerStats};
use super::reader::StreamReader;
use crate::config::{ReaderConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::protocol::{AudioInfo, Packet, SessionId, SessionSummary};

/// Dispatcher state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

/// One logical producer stream
pub struct Session {
    id: SessionId,
    audio_info: AudioInfo,
    created_at: DateTime<Utc>,
    inbound: mpsc::Sender<Packet>,
    fanout: FanOut,
    shutdown: watch::Sender<bool>,
    packets_received: AtomicU64,
    inbound_dropped: AtomicU64,
}

impl Session {
    /// Create the session and start its dispatcher
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(id: SessionId, audio_info: AudioInfo, config: &SessionConfig) -> Arc<Self> {
        let (inbound, packets) = mpsc::channel(config.inbound_capacity.max(1));
        let (shutdown, stop) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            audio_info,
            created_at: Utc::now(),
            inbound,
            fanout: FanOut::new(config.delivery_backlog, config.delivery_timeout()),
            shutdown,
            packets_received: AtomicU64::new(0),
            inbound_dropped: AtomicU64::new(0),
        });

        tokio::spawn(dispatch(Arc::downgrade(&session), id, packets, stop));
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn audio_info(&self) -> AudioInfo {
        self.audio_info
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        if *self.shutdown.borrow() {
            SessionState::Stopped
        } else {
            SessionState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Queue a decoded packet for fan-out without waiting
    pub fn push(&self, packet: Packet) -> Result<()> {
        if !self.is_running() {
            return Err(Error::SessionStopped(self.id));
        }
        match self.inbound.try_send(packet) {
            Ok(()) => {
                self.packets_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.inbound_dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::InboundFull(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(Error::SessionStopped(self.id)),
        }
    }

    /// Register a listener channel; `None` if the session is stopped
    pub fn add_listener(&self, listener: mpsc::Sender<Packet>) -> Option<ListenerId> {
        let id = self.fanout.add(listener)?;
        tracing::info!(
            session_id = self.id,
            listener = id,
            "Added a listener, new number: {}",
            self.fanout.len()
        );
        Some(id)
    }

    /// Deregister a listener; idempotent
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.fanout.remove(id);
        if removed {
            tracing::info!(
                session_id = self.id,
                listener = id,
                "Removed a listener, new number: {}",
                self.fanout.len()
            );
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.fanout.len()
    }

    pub fn listener_stats(&self, id: ListenerId) -> Option<Arc<ListenerStats>> {
        self.fanout.listener_stats(id)
    }

    /// Open a new reader on this session
    pub fn subscribe(self: &Arc<Self>, config: &ReaderConfig) -> StreamReader {
        StreamReader::subscribe(self.clone(), config)
    }

    /// Stop the dispatcher and release all listeners
    pub fn stop(&self) {
        let was_running = !self.shutdown.send_replace(true);
        let released = self.fanout.close();
        if was_running {
            tracing::info!(session_id = self.id, released, "Session stopped");
        }
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            inbound_dropped: self.inbound_dropped.load(Ordering::Relaxed),
            forfeited: self.fanout.forfeited(),
            listeners: self.fanout.len(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            audio_info: self.audio_info,
            created_at: self.created_at,
            listeners: self.fanout.len(),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("audio_info", &self.audio_info)
            .field("state", &self.state())
            .field("listeners", &self.fanout.len())
            .finish()
    }
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_received: u64,
    pub inbound_dropped: u64,
    pub forfeited: u64,
    pub listeners: usize,
}

/// Dispatcher loop: fans every inbound packet out until the session stops
async fn dispatch(
    session: Weak<Session>,
    id: SessionId,
    mut packets: mpsc::Receiver<Packet>,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!(session_id = id, "Dispatcher started");
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                let Some(session) = session.upgrade() else { break };
                session.fanout.broadcast(&packet);
            }
        }
    }
    tracing::debug!(session_id = id, "Dispatcher finished");
}
