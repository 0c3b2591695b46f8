use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bot must be idle to start")]
    InvalidStateTransition,
    #[error("agent did not become ready before the configured timeout")]
    AgentReadyTimeout,
    #[error("agent is shutting down, cannot handle message")]
    AgentUnavailable,
    #[error(transparent)]
    Router(#[from] kbot_router::RouterError),
    #[error(transparent)]
    Lifecycle(#[from] kbot_lifecycle::LifecycleError),
    #[error(transparent)]
    Agent(#[from] kbot_agent::AgentError),
    #[error(transparent)]
    Rpc(#[from] kbot_core::RpcError),
    #[error(transparent)]
    Conversation(#[from] kbot_conversations::ConversationError),
    #[error(transparent)]
    Session(#[from] kbot_sessions::SessionError),
    #[error(transparent)]
    Channel(#[from] kbot_channels::ChannelError),
    #[error(transparent)]
    Core(#[from] kbot_core::CoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
