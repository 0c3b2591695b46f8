use kbot_core::{ConversationStatus, EventRange, Role};

/// Supplies session-id existence checks to `ConversationStore::append_turn`
/// so the turn's `session_id` can be validated against the session store
/// without this crate depending on `kbot-sessions` directly.
pub trait SessionExistenceCheck: Send + Sync {
    fn session_exists(&self, session_id: &str) -> bool;
}

/// Input to `ConversationStore::append_turn`. `ts` and `seq` are assigned
/// by the store when absent.
#[derive(Debug, Clone)]
pub struct AppendTurnInput {
    pub role: Role,
    pub session_id: String,
    pub event_range: EventRange,
    pub message_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub ts: Option<i64>,
    pub seq: Option<u64>,
}

impl AppendTurnInput {
    pub fn new(role: Role, session_id: impl Into<String>, event_range: EventRange) -> Self {
        Self {
            role,
            session_id: session_id.into(),
            event_range,
            message_id: None,
            metadata: None,
            ts: None,
            seq: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Filters accepted by `ConversationStore::list_conversations`.
#[derive(Debug, Clone, Default)]
pub struct ListConversationsFilter {
    pub status: Option<ConversationStatus>,
    pub limit: Option<usize>,
}

/// Result of `ConversationStore::append_turn`: the persisted (or already
/// existing) turn plus whether this call observed a pre-existing duplicate.
#[derive(Debug, Clone)]
pub struct AppendTurnOutcome {
    pub turn: kbot_core::ConversationTurn,
    pub was_duplicate: bool,
}

pub type ConversationRecord = kbot_core::Conversation;
pub type TurnRecord = kbot_core::ConversationTurn;
