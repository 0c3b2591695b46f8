use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("no transformer registered for platform `{0}`")]
    MissingTransformer(String),

    #[error("normalization failed: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, TransformError>;
