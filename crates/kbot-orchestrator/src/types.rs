use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kbot_core::ConversationTurn;

/// `idle → starting → running → stopping → stopped`. `start()` requires
/// `idle`; `stop()` is idempotent from any state past `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A one-shot wake prompt loaded from an externally-parsed restart
/// checkpoint. Parsing and deleting the checkpoint file itself is outside
/// this crate's scope — the orchestrator only consumes the struct exactly
/// once and calls `on_consumed` so the caller can remove the file.
#[derive(Debug, Clone)]
pub struct WakeContext {
    pub prompt: String,
    pub pending_work: Option<String>,
    pub instructions: Option<String>,
}

/// Events the orchestrator emits on its bus.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    MessageProcessed { message_id: String, duration_ms: u64 },
    MessageError { message_id: String, error: String },
    Escalate { reason: String, metadata: serde_json::Value, target_channel: Option<String>, timestamp: DateTime<Utc> },
    ToolUpdate { session_id: String, update: kbot_core::SessionUpdate },
    Error { message: String },
}

/// Supplies a restoration prompt summarizing older turns when a session is
/// rotated or recovered mid-conversation. The concrete summarization
/// strategy (calling back into the agent, a cheaper local model, plain
/// truncation) is external — implementors own it.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, conversation_id: &str, turns: &[ConversationTurn]) -> Option<String>;
}

/// Which platforms support editing an already-sent message in place —
/// decides whether `handle_message` builds an edit-based or buffered
/// coalescer for a given channel.
pub trait PlatformCapabilities: Send + Sync {
    fn supports_streaming(&self, platform: &str) -> bool;
}

/// A fixed set of platforms that support streaming edits; every other
/// platform falls back to the buffered, emit-per-chunk coalescer.
#[derive(Debug, Clone, Default)]
pub struct StaticPlatformCapabilities {
    streaming_platforms: std::collections::HashSet<String>,
}

impl StaticPlatformCapabilities {
    pub fn new(streaming_platforms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { streaming_platforms: streaming_platforms.into_iter().map(Into::into).collect() }
    }
}

impl PlatformCapabilities for StaticPlatformCapabilities {
    fn supports_streaming(&self, platform: &str) -> bool {
        self.streaming_platforms.contains(platform)
    }
}
