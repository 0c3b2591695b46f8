use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Which kind of peer a session key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    User,
    Channel,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Channel => write!(f, "channel"),
        }
    }
}

impl std::str::FromStr for PeerKind {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "channel" => Ok(Self::Channel),
            other => Err(CoreError::InvalidSessionKey(format!(
                "unknown peer kind: {other}"
            ))),
        }
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Deterministic session key: `"<agent>:<platform>:<peerKind>:<peerId>"`.
///
/// The same `(agent, platform, peerKind, peerId)` tuple always formats to the
/// same string — this is the sole index into the logical-session table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    pub agent: String,
    pub platform: String,
    pub peer_kind: PeerKind,
    pub peer_id: String,
}

impl SessionKey {
    pub fn new(
        agent: impl Into<String>,
        platform: impl Into<String>,
        peer_kind: PeerKind,
        peer_id: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            agent: agent.into(),
            platform: platform.into(),
            peer_kind,
            peer_id: peer_id.into(),
        };
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<()> {
        for (name, seg) in [
            ("agent", self.agent.as_str()),
            ("platform", self.platform.as_str()),
            ("peer_id", self.peer_id.as_str()),
        ] {
            if !is_valid_segment(seg) {
                return Err(CoreError::InvalidSessionKey(format!(
                    "invalid {name} segment: {seg:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn format(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.agent, self.platform, self.peer_kind, self.peer_id
        )
    }

    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let [agent, platform, peer_kind, peer_id] = parts.as_slice() else {
            return Err(CoreError::InvalidSessionKey(format!(
                "expected 4 colon-separated segments: {s}"
            )));
        };
        let peer_kind: PeerKind = peer_kind.parse()?;
        Self::new(*agent, *platform, peer_kind, *peer_id)
    }

    pub fn as_str(&self) -> String {
        self.format()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl TryFrom<String> for SessionKey {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> String {
        key.format()
    }
}

/// The sender of a normalized inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub platform: String,
    pub display_name: Option<String>,
}

/// Platform-agnostic message shape every channel adapter must produce.
///
/// `id` is the platform's stable message identifier and the sole key for
/// intake idempotence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub channel: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Status of one agent session (a context-window instance inside the agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl AgentSessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for AgentSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One instance of a context window inside the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub status: AgentSessionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The type of one append record in an agent session's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "prompt.sent")]
    PromptSent,
    #[serde(rename = "message.chunk")]
    MessageChunk,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    Note,
}

/// One append record in an agent session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: SessionEventType,
    pub session_id: String,
    pub seq: u64,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub data: serde_json::Value,
}

/// Status of a durable conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// A durable thread of user/assistant/system turns, keyed by session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session_key: String,
    pub status: ConversationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub turn_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The role that produced one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(CoreError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Inclusive `[start_seq, end_seq]` pointer into an agent session's event log
/// — the events that reconstruct one conversation turn's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRange {
    pub start_seq: u64,
    pub end_seq: u64,
}

impl EventRange {
    pub fn validate(&self) -> Result<()> {
        if self.start_seq > self.end_seq {
            return Err(CoreError::Validation(format!(
                "event_range.start_seq ({}) > end_seq ({})",
                self.start_seq, self.end_seq
            )));
        }
        Ok(())
    }
}

/// One user/assistant/system turn within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub seq: u64,
    pub ts: i64,
    pub role: Role,
    pub session_id: String,
    pub event_range: EventRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_roundtrip() {
        let key = SessionKey::new("main", "discord", PeerKind::User, "u1").unwrap();
        let s = key.format();
        assert_eq!(s, "main:discord:user:u1");
        let parsed = SessionKey::parse(&s).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn session_key_deterministic() {
        let a = SessionKey::new("main", "discord", PeerKind::User, "u1").unwrap();
        let b = SessionKey::new("main", "discord", PeerKind::User, "u1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn session_key_rejects_malformed() {
        assert!(SessionKey::parse("main:discord:user").is_err());
        assert!(SessionKey::parse("main:discord:user:u1:extra").is_err());
        assert!(SessionKey::parse("main:discord:bogus:u1").is_err());
        assert!(SessionKey::new("", "discord", PeerKind::User, "u1").is_err());
    }

    #[test]
    fn event_range_rejects_inverted() {
        let range = EventRange {
            start_seq: 5,
            end_seq: 2,
        };
        assert!(range.validate().is_err());
    }
}
