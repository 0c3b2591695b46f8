use kbot_core::{AgentSessionStatus, SessionEventType};

/// Input to `SessionStore::create_session`.
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub id: String,
    pub agent_type: String,
    pub conversation_id: Option<String>,
    pub session_key: Option<String>,
}

/// Input to `SessionStore::append_event`. `ts` and `seq` are assigned by the
/// store when absent.
#[derive(Debug, Clone)]
pub struct AppendEventInput {
    pub event_type: SessionEventType,
    pub session_id: String,
    pub data: serde_json::Value,
    pub trace_id: Option<String>,
    pub ts: Option<i64>,
    pub seq: Option<u64>,
}

impl AppendEventInput {
    pub fn new(session_id: impl Into<String>, event_type: SessionEventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            data,
            trace_id: None,
            ts: None,
            seq: None,
        }
    }
}

/// Filters accepted by `SessionStore::list_sessions`.
#[derive(Debug, Clone, Default)]
pub struct ListSessionsFilter {
    pub status: Option<AgentSessionStatus>,
    pub agent_type: Option<String>,
    pub limit: Option<usize>,
}

/// On-disk `session.yaml` shape — identical to `kbot_core::AgentSession`.
pub type SessionRecord = kbot_core::AgentSession;

/// One deserialized `events.jsonl` line.
pub type EventRecord = kbot_core::SessionEvent;
