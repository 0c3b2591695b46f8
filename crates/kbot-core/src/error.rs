use thiserror::Error;

/// Shared error kinds that cross crate boundaries (session keys, turn/event
/// schema validation). Component crates layer their own richer error enums
/// on top and convert into/out of these via `#[from]`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
