use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent process already running")]
    AlreadyRunning,
    #[error("agent process is not running")]
    NotRunning,
    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error(transparent)]
    Rpc(#[from] kbot_core::RpcError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
