use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use kbot_core::SessionKey;

/// The per-peer conversation container. Distinct from the durable
/// conversation (`kbot-conversations`) — this is in-memory bookkeeping for
/// intake idempotence and activity tracking.
#[derive(Debug, Clone)]
pub struct LogicalSession {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub agent_session_id: Option<String>,
    recent_message_ids: VecDeque<String>,
    recent_capacity: usize,
}

impl LogicalSession {
    pub(crate) fn new(key: SessionKey, recent_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            key,
            created_at: now,
            last_activity: now,
            agent_session_id: None,
            recent_message_ids: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
        }
    }

    /// `true` if `message_id` was not already present in the recent-context
    /// buffer (the bounded window of recently-seen external message ids).
    /// Records it either way when absent, evicting the oldest entry once
    /// the buffer is full.
    pub(crate) fn observe_message_id(&mut self, message_id: &str) -> bool {
        if self.recent_message_ids.iter().any(|id| id == message_id) {
            return false;
        }
        if self.recent_message_ids.len() >= self.recent_capacity {
            self.recent_message_ids.pop_front();
        }
        self.recent_message_ids.push_back(message_id.to_string());
        true
    }
}
