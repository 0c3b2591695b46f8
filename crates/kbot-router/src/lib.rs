//! Deterministic session-key derivation and the in-memory logical-session
//! registry (local intake idempotence), distinct from the durable stores.

pub mod error;
pub mod router;
pub mod types;

pub use error::{Result, RouterError};
pub use router::SessionRouter;
pub use types::LogicalSession;
