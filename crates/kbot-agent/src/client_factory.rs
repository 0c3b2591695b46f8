use std::sync::Arc;

use kbot_core::AgentRpcClient;
use tokio::process::Child;

/// The injection seam between process lifecycle and wire protocol.
///
/// `AgentLifecycle` owns spawning, health probing, and restarting the agent
/// subprocess, but has no opinion on how callers talk to it over stdio — that
/// framing is supplied by whoever constructs the client for a freshly spawned
/// child.
pub trait ClientFactory: Send + Sync {
    fn build(&self, child: &mut Child) -> Arc<dyn AgentRpcClient>;
}
