use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("usage probe timed out")]
    Timeout,

    #[error("usage probe failed: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, ContextError>;
