//! Session registry: owns every live session, keyed by random id

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

use super::stream::Session;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::{AudioInfo, SessionId, SessionSummary};

/// Give up after this many consecutive id collisions
const MAX_ID_ATTEMPTS: usize = 16;

/// Source of fresh session ids
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<SessionId>;
}

/// Draws ids from the operating system's secure random source
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngIdGenerator;

impl IdGenerator for OsRngIdGenerator {
    fn next_id(&self) -> Result<SessionId> {
        let mut bytes = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
        Ok(SessionId::from_le_bytes(bytes))
    }
}

/// Concurrent map from session id to session
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    ids: Box<dyn IdGenerator>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_id_generator(config, OsRngIdGenerator)
    }

    pub fn with_id_generator(config: SessionConfig, ids: impl IdGenerator + 'static) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ids: Box::new(ids),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session with the configured default format
    pub fn create_default_session(&self) -> Result<Arc<Session>> {
        self.create_session(self.config.audio_info)
    }

    /// Create and start a session under a fresh, unused id
    pub fn create_session(&self, audio_info: AudioInfo) -> Result<Arc<Session>> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next_id()?;

            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                tracing::debug!(session_id = id, "Session id collision, regenerating");
                continue;
            }
            let session = Session::start(id, audio_info, &self.config);
            sessions.insert(id, session.clone());
            drop(sessions);

            tracing::info!(
                session_id = id,
                sample_rate = audio_info.sample_rate,
                channels = audio_info.channels,
                "Created session"
            );
            return Ok(session);
        }

        Err(Error::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Find a live session
    pub fn lookup(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Snapshot of every session, ordered by creation time
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.read().values().map(|s| s.summary()).collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }

    /// Snapshot of every session id
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and stop a session
    pub fn remove_session(&self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.write().remove(&id)?;
        session.stop();
        tracing::info!(session_id = id, "Removed session");
        Some(session)
    }

    /// Stop and forget every session
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.stop();
        }
        tracing::info!("Registry shut down, {} sessions stopped", sessions.len());
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
