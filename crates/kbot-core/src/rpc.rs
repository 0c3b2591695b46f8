//! The abstract agent RPC client contract (spec §6 "Agent RPC"). The wire
//! framing used to talk to the agent subprocess is an external concern;
//! this crate only fixes the shape callers and implementors agree on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("agent rpc transport error: {0}")]
    Transport(String),
    #[error("agent rpc timed out")]
    Timeout,
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Parameters to open a new agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionParams {
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// Where a prompt originated — a user message or a system-injected one
/// (identity, wake-context, restoration summaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    User,
    System,
}

/// One block of prompt content. Only `text` exists today; the tag is kept
/// so the wire shape can grow without breaking callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptContent {
    Text { text: String },
}

impl PromptContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub session_id: String,
    pub prompt: Vec<PromptContent>,
    pub prompt_source: PromptSource,
}

impl PromptRequest {
    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: vec![PromptContent::text(text)],
            prompt_source: PromptSource::User,
        }
    }

    pub fn system(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: vec![PromptContent::text(text)],
            prompt_source: PromptSource::System,
        }
    }
}

/// Returned once the agent finishes processing a `prompt` call. Streaming
/// content arrives separately via `SessionUpdate`; this is the call's
/// terminal acknowledgement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The discriminant of one `update` stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionUpdateKind {
    AgentMessageChunk,
    ToolCall,
    ToolCallUpdate,
}

/// One record from the agent's streaming `update` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_update: SessionUpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// The abstract RPC handle the orchestrator drives. The concrete wire
/// protocol to the agent subprocess (framing, transport) is external to
/// this contract — implementors own it.
#[async_trait]
pub trait AgentRpcClient: Send + Sync {
    async fn new_session(&self, params: NewSessionParams) -> Result<String>;
    async fn prompt(&self, req: PromptRequest) -> Result<PromptResponse>;
    /// Subscribe to the update stream for `session_id`. Each call gets its
    /// own receiver; the sender side fans updates out to every subscriber.
    fn subscribe(&self, session_id: &str) -> mpsc::Receiver<SessionUpdate>;
}
