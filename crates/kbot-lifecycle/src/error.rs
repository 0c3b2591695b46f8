use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Rpc(#[from] kbot_core::RpcError),
    #[error(transparent)]
    Session(#[from] kbot_sessions::SessionError),
    #[error(transparent)]
    Conversation(#[from] kbot_conversations::ConversationError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
