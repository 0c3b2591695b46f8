use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillsError {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}`: expected {expected_type}, got {actual_type}")]
    TypeMismatch { field: String, expected_type: String, actual_type: String },

    #[error("skill `{0}` is already registered")]
    DuplicateId(String),

    #[error("skill `{0}` not found")]
    NotFound(String),

    #[error("no skill registered for capability `{0}`")]
    CapabilityNotFound(String),

    #[error("skill `{0}` failed to initialize: {1}")]
    InitFailed(String, String),

    #[error("skill `{0}` execution failed: {1}")]
    ExecutionFailed(String, String),
}

pub type Result<T> = std::result::Result<T, SkillsError>;
