//! Registry of live terminal sessions.
//!
//! Connections reserve a slot before a PTY is allocated, so a full daemon
//! refuses new terminals without ever spawning a shell. The slot is released
//! when its [`SessionSlot`] guard is dropped, whatever path the connection
//! took to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::SessionSummary;

use super::session::{PtySession, SessionError, SessionId};

/// Tracks live sessions and enforces the session limit.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<PtySession>>,
    reserved: AtomicUsize,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry admitting at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Reserves a slot for a new session.
    ///
    /// Fails with [`SessionError::ResourceExhausted`] when the limit is
    /// reached.
    pub fn reserve(self: &Arc<Self>) -> Result<SessionSlot, SessionError> {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_sessions).then_some(n + 1)
            })
            .map_err(|n| {
                SessionError::ResourceExhausted(format!(
                    "terminal session limit reached ({n}/{})",
                    self.max_sessions
                ))
            })?;
        Ok(SessionSlot {
            registry: Arc::clone(self),
            session_id: None,
        })
    }

    /// Number of reserved slots, including sessions still starting.
    pub fn count(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Looks up a session by ID.
    pub fn get(&self, id: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Summaries of all registered sessions, ordered by ID.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionSummary {
                    id: session.id().clone(),
                    pid: session.pid(),
                    state: session.state().as_str().to_string(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Closes every registered session. Returns how many this call released.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Arc<PtySession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let outcomes =
            futures_util::future::join_all(sessions.iter().map(|session| session.close())).await;
        let released = outcomes.iter().filter(|o| o.is_released()).count();

        if !sessions.is_empty() {
            tracing::info!(total = sessions.len(), released, "Closed all terminal sessions");
        }
        released
    }
}

/// A reserved place in the registry.
#[derive(Debug)]
pub struct SessionSlot {
    registry: Arc<SessionRegistry>,
    session_id: Option<SessionId>,
}

impl SessionSlot {
    /// Registers the opened session under this slot.
    pub fn attach(&mut self, session: &Arc<PtySession>) {
        self.registry
            .sessions
            .insert(session.id().clone(), Arc::clone(session));
        self.session_id = Some(session.id().clone());
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if let Some(id) = self.session_id.take() {
            self.registry.sessions.remove(&id);
            tracing::debug!(session_id = %id, "Deregistered terminal session");
        }
        self.registry.reserved.fetch_sub(1, Ordering::SeqCst);
    }
}
