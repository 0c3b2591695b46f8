use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found: {id}")]
    NotFound { id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("referenced session does not exist: {session_id}")]
    UnknownSession { session_id: String },
    #[error(transparent)]
    Fs(#[from] kbot_fsutil::FsError),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed metadata: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Core(#[from] kbot_core::CoreError),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
