//! Session table.
//!
//! Tracks every open session so the server can enforce `max_sessions` and
//! close everything on shutdown. Handlers never see this table; they only
//! receive the handle of the session they serve.

use super::handle::{PeerInfo, Session};
use herald_core::{Frame, HeraldError, HeraldResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Information returned when listing sessions.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub remote_addr: SocketAddr,
    pub age_secs: u64,
    pub active_timers: usize,
}

/// Manages all open sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session and move it to `Open`.
    pub async fn open(
        &self,
        peer: PeerInfo,
        outbound: mpsc::Sender<Frame>,
    ) -> HeraldResult<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(HeraldError::SessionLimit(self.max_sessions));
        }

        let mut session_id = generate_session_id();
        while sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }

        let session = Session::new(session_id.clone(), peer, outbound);
        session.open();
        sessions.insert(session_id.clone(), Arc::clone(&session));
        info!(
            session_id = %session_id,
            remote = %session.peer().remote_addr,
            open = sessions.len(),
            "session opened"
        );
        Ok(session)
    }

    /// Close and forget a session. Returns the number of timers cancelled.
    pub async fn close(&self, session_id: &str) -> HeraldResult<usize> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                let cancelled = session.close().unwrap_or(0);
                info!(session_id, timers_cancelled = cancelled, "session removed");
                Ok(cancelled)
            }
            None => Err(HeraldError::SessionClosed(session_id.to_string())),
        }
    }

    /// Close every session (server shutdown). Returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in &drained {
            session.close();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "closed all sessions");
        }
        drained.len()
    }

    #[cfg(test)]
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// List all open sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|s| SessionInfo {
                id: s.id().to_string(),
                remote_addr: s.peer().remote_addr,
                age_secs: s.age().as_secs(),
                active_timers: s.timers().len(),
            })
            .collect()
    }

    /// Get the number of open sessions.
    #[cfg(test)]
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
