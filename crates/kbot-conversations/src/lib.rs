//! Append-only per-conversation turn log, idempotent by external message
//! id, indexed by session key.

pub mod error;
pub mod store;
pub mod types;

pub use error::{ConversationError, Result};
pub use store::ConversationStore;
pub use types::{
    AppendTurnInput, AppendTurnOutcome, ConversationRecord, ListConversationsFilter,
    SessionExistenceCheck, TurnRecord,
};
