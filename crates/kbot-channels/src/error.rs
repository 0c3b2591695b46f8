use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("channel is shutting down")]
    ShuttingDown,

    #[error("{0} is not supported by this adapter")]
    Unsupported(&'static str),

    #[error("channel lifecycle consumer task is gone")]
    ConsumerGone,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
