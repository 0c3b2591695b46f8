use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoalescerError {
    #[error("coalescer consumer task is gone")]
    ConsumerGone,
}

pub type Result<T> = std::result::Result<T, CoalescerError>;
