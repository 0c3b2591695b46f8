use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, warn};

use crate::lifecycle::ChannelLifecycle;

/// Every registered channel lifecycle, addressable by platform name —
/// the wiring surface the orchestrator dispatches outbound sends through.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<ChannelLifecycle>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    pub fn register(&self, platform: impl Into<String>, lifecycle: Arc<ChannelLifecycle>) {
        self.channels.insert(platform.into(), lifecycle);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<ChannelLifecycle>> {
        self.channels.get(platform).map(|entry| entry.clone())
    }

    pub async fn start_all(&self) {
        let entries: Vec<(String, Arc<ChannelLifecycle>)> =
            self.channels.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (platform, lifecycle) in entries {
            if let Err(e) = lifecycle.start().await {
                error!(platform = %platform, error = %e, "failed to start channel");
            }
        }
    }

    pub async fn stop_all(&self) {
        let entries: Vec<(String, Arc<ChannelLifecycle>)> =
            self.channels.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (platform, lifecycle) in entries {
            if let Err(e) = lifecycle.stop().await {
                warn!(platform = %platform, error = %e, "error stopping channel");
            }
        }
    }
}
