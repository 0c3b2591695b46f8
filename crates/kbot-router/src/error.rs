use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error(transparent)]
    Core(#[from] kbot_core::CoreError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
