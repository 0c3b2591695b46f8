use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// State of a [`crate::lifecycle::ChannelLifecycle`], distinct from the
/// adapter's own [`ChannelStatus`] — this tracks the lifecycle's view of
/// the world (including reconnect/drain phases the adapter doesn't know
/// about).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
    Failed,
}

/// Result of an `editMessage` call that overflowed the platform's limit:
/// the original message keeps the first chunk, and one or more new
/// messages carry the rest.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub edited_id: String,
    pub overflow_ids: Vec<String>,
}

/// Events emitted by a [`crate::lifecycle::ChannelLifecycle`].
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    ReconnectExhausted,
    SendFailed { channel: String, error: String },
    SendDropped { channel: String },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct ChannelLifecycleConfig {
    pub health_check_interval: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_failure_threshold: u32,
    pub send_backoff_start: Duration,
    pub send_backoff_cap: Duration,
    pub send_max_attempts: u32,
    pub send_drain: Duration,
}

impl Default for ChannelLifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            reconnect_failure_threshold: 3,
            send_backoff_start: Duration::from_millis(100),
            send_backoff_cap: Duration::from_millis(2000),
            send_max_attempts: 5,
            send_drain: Duration::from_secs(30),
        }
    }
}
