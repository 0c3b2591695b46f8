use chrono::{DateTime, Utc};
use std::time::Duration;

/// `idle → spawning → healthy ⇄ unhealthy → recovering → stopping →
/// terminated | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycleState {
    Idle,
    Spawning,
    Healthy,
    Unhealthy,
    Recovering,
    Stopping,
    Terminated,
    Failed,
}

impl std::fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Recovering => "recovering",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Observability snapshot beyond plain healthy/unhealthy — an operator
/// inspecting `get_state()` can see how close the process is to escalating.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: AgentLifecycleState,
    pub consecutive_failures: u32,
    pub recoveries_attempted: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub spawned_at: Option<DateTime<Utc>>,
}

/// Configuration for one `AgentLifecycle`.
#[derive(Debug, Clone)]
pub struct AgentLifecycleConfig {
    pub command: String,
    pub args: Vec<String>,
    pub health_check_interval: Duration,
    /// `N`: consecutive probe failures before the process is marked unhealthy.
    pub failure_threshold: u32,
    /// `M`: failed recoveries before escalating and giving up.
    pub max_recoveries: u32,
    pub graceful_stop_timeout: Duration,
}

impl Default for AgentLifecycleConfig {
    fn default() -> Self {
        Self {
            command: "true".to_string(),
            args: Vec::new(),
            health_check_interval: Duration::from_secs(30),
            failure_threshold: 3,
            max_recoveries: 3,
            graceful_stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Events emitted on the lifecycle's bus.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Spawned { pid: Option<u32> },
    StateChange { from: AgentLifecycleState, to: AgentLifecycleState },
    HealthStatus { healthy: bool, recovered: bool },
    Escalate { reason: String, context: serde_json::Value },
    Error { message: String, context: serde_json::Value },
}
