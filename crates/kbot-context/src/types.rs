use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Estimates `usedTokens/maxTokens` for one agent session. The concrete
/// mechanism (parsing the agent's stderr, a dedicated sampling RPC call) is
/// external to this crate — implementors own it.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    async fn sample(&self, session_id: &str) -> Result<f64>;
}

#[derive(Debug, Clone, Copy)]
pub struct ContextTrackerConfig {
    /// Minimum time between samples for the same session key.
    pub debounce: Duration,
    /// Hard cap on a single probe call.
    pub probe_timeout: Duration,
}

impl Default for ContextTrackerConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_secs(30), probe_timeout: Duration::from_secs(10) }
    }
}
