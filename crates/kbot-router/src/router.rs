use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use kbot_core::{NormalizedMessage, PeerKind, SessionKey};

use crate::error::{Result, RouterError};
use crate::types::LogicalSession;

const DEFAULT_RECENT_CAPACITY: usize = 64;

/// Derives a deterministic session key from a normalized message and
/// looks up/creates the in-memory logical-session record for it.
///
/// Distinct session keys route independently; callers are expected to
/// serialize state transitions for a single key themselves (the lifecycle
/// manager's per-key lock) — this router only owns intake idempotence and
/// the valid-agent set.
pub struct SessionRouter {
    agents: DashSet<String>,
    sessions: dashmap::DashMap<String, Arc<Mutex<LogicalSession>>>,
    recent_capacity: usize,
}

impl SessionRouter {
    pub fn new() -> Self {
        Self {
            agents: DashSet::new(),
            sessions: dashmap::DashMap::new(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    pub fn add_agent(&self, agent_id: impl Into<String>) {
        self.agents.insert(agent_id.into());
    }

    pub fn remove_agent(&self, agent_id: &str) {
        self.agents.remove(agent_id);
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.contains(agent_id)
    }

    /// Computes the session key (always `peerKind = user` for message
    /// senders), creates the session record if absent, records the
    /// message's id in the recent-context buffer if not already present
    /// (local intake idempotence — distinct from the durable store's),
    /// and bumps `last_activity`.
    #[instrument(skip(self, msg), fields(agent_id, message_id = %msg.id))]
    pub async fn resolve_session(
        &self,
        msg: &NormalizedMessage,
        agent_id: &str,
    ) -> Result<Arc<Mutex<LogicalSession>>> {
        if !self.has_agent(agent_id) {
            return Err(RouterError::UnknownAgent(agent_id.to_string()));
        }

        let key = SessionKey::new(agent_id, &msg.sender.platform, PeerKind::User, &msg.sender.id)?;
        let key_str = key.format();

        let entry = self
            .sessions
            .entry(key_str)
            .or_insert_with(|| Arc::new(Mutex::new(LogicalSession::new(key, self.recent_capacity))))
            .clone();

        {
            let mut session = entry.lock().await;
            let was_new_message = session.observe_message_id(&msg.id);
            session.last_activity = chrono::Utc::now();
            debug!(was_new_message, "resolved logical session");
        }

        Ok(entry)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new()
    }
}
