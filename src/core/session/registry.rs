use crate::core::session::session::{Session, SessionDescriptor, SessionId, SessionInfo, SessionRuntime};
use crate::core::session::state::SessionStatus;
use crate::domain::error::{CommHubError, CommHubResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry entry: the session entity plus its live runtime
pub struct SessionEntry {
    pub session: Session,
    pub runtime: Arc<SessionRuntime>,
}

/// Applied status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: SessionStatus,
    pub current: SessionStatus,
}

/// Owns the session map. Mutations take the exclusive section, reads the
/// shared one.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session. `build` attaches the runtime for the freshly
    /// generated identifier before the entry becomes visible.
    pub async fn create<F>(&self, descriptor: SessionDescriptor, build: F) -> CommHubResult<Session>
    where
        F: FnOnce(&Session) -> CommHubResult<Arc<SessionRuntime>>,
    {
        let session = Session::new(descriptor);
        let runtime = build(&session)?;

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                runtime,
            },
        );

        info!("Created session '{}' ({}, {})", session.id, session.kind, session.endpoint());
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> CommHubResult<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| CommHubError::not_found(id))
    }

    pub async fn runtime(&self, id: &str) -> CommHubResult<Arc<SessionRuntime>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.runtime))
            .ok_or_else(|| CommHubError::not_found(id))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Detach the entry. The caller closes the runtime outside the lock.
    pub async fn remove(&self, id: &str) -> CommHubResult<SessionEntry> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.remove(id).ok_or_else(|| CommHubError::not_found(id))?;
        debug!("Removed session '{}' from registry", id);
        Ok(entry)
    }

    /// Apply a status transition. Returns `None` when the session already
    /// has `status`.
    pub async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> CommHubResult<Option<StatusChange>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id).ok_or_else(|| CommHubError::not_found(id))?;
        let previous = entry.session.status;

        if previous == status {
            return Ok(None);
        }
        if !previous.can_transition_to(status) {
            return Err(CommHubError::InvalidTransition {
                from: previous.to_string(),
                to: status.to_string(),
            });
        }

        entry.session.status = status;
        if status.is_active() {
            entry.session.connected_at = Some(crate::core::communication::message::now_millis());
            entry.session.local_addr = entry.runtime.adapter.local_addr();
        }

        debug!("Session '{}' status {} -> {}", id, previous, status);
        Ok(Some(StatusChange {
            previous,
            current: status,
        }))
    }

    /// Mutate a session in place under the exclusive section
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> CommHubResult<R> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id).ok_or_else(|| CommHubError::not_found(id))?;
        Ok(f(&mut entry.session))
    }

    pub async fn info(&self, id: &str) -> CommHubResult<SessionInfo> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id).ok_or_else(|| CommHubError::not_found(id))?;
        Ok(entry.session.info(entry.runtime.adapter.peer_count()))
    }

    /// Snapshot of every session
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions
            .values()
            .map(|entry| entry.session.info(entry.runtime.adapter.peer_count()))
            .collect();
        list.sort_by_key(|info| info.created_at);
        list
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
