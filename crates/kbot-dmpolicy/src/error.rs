use thiserror::Error;

#[derive(Debug, Error)]
pub enum DmPolicyError {
    #[error("pairing request not found: {id}")]
    NotFound { id: String },
    #[error("pairing request {id} is already resolved")]
    AlreadyResolved { id: String },
    #[error(transparent)]
    Fs(#[from] kbot_fsutil::FsError),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DmPolicyError>;
