use dashmap::DashMap;
use tokio::time::{timeout, Instant};
use tracing::{instrument, warn};

use crate::error::ContextError;
use crate::types::{ContextTrackerConfig, UsageProbe};

/// Per-session-key debounced sampler. A probe failure or an out-of-window
/// call is logged and swallowed — callers keep whatever fraction they last
/// observed rather than blocking message handling on this.
pub struct ContextUsageTracker {
    config: ContextTrackerConfig,
    last_sampled: DashMap<String, Instant>,
}

impl ContextUsageTracker {
    pub fn new(config: ContextTrackerConfig) -> Self {
        Self { config, last_sampled: DashMap::new() }
    }

    /// Whether `session_key` is due for another sample given the debounce
    /// window. Does not itself mutate any state.
    pub fn is_due(&self, session_key: &str) -> bool {
        match self.last_sampled.get(session_key) {
            Some(last) => last.elapsed() >= self.config.debounce,
            None => true,
        }
    }

    /// Samples `session_id`'s usage fraction if `session_key` is due,
    /// bounded by the configured probe timeout. Returns `None` on a
    /// debounced skip, a timeout, or a probe error — in every `None` case
    /// the caller should keep its last known fraction.
    #[instrument(skip(self, probe))]
    pub async fn sample(
        &self,
        session_key: &str,
        session_id: &str,
        probe: &dyn UsageProbe,
    ) -> Option<f64> {
        if !self.is_due(session_key) {
            return None;
        }
        self.last_sampled.insert(session_key.to_string(), Instant::now());

        match timeout(self.config.probe_timeout, probe.sample(session_id)).await {
            Ok(Ok(fraction)) => Some(fraction.clamp(0.0, 1.0)),
            Ok(Err(e)) => {
                warn!(session_key, error = %e, "context usage probe failed");
                None
            }
            Err(_) => {
                warn!(session_key, error = %ContextError::Timeout, "context usage probe timed out");
                None
            }
        }
    }
}
