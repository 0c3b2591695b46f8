use chrono::{DateTime, Utc};

/// The mapping `session-key → SessionState` the lifecycle manager owns.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub acp_session_id: String,
    pub conversation_id: Option<String>,
    pub context_usage_fraction: f64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of `SessionLifecycleManager::get_or_create_session`.
#[derive(Debug, Clone)]
pub struct GetOrCreateOutcome {
    pub state: SessionState,
    pub is_new: bool,
    pub was_rotated: bool,
    pub was_recovered: bool,
}

/// Events the lifecycle manager emits on its bus.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    SessionCreated { key: String, session_id: String },
    SessionRotated { key: String, old_session_id: String, new_session_id: String },
    SessionRecovered { key: String, session_id: String },
    SessionRestoreError { key: String, message: String },
}
