//! Append-only per-agent-session event log: one directory per session
//! containing `session.yaml` metadata and an `events.jsonl` line log.

pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use store::SessionStore;
pub use types::{AppendEventInput, CreateSessionInput, EventRecord, ListSessionsFilter, SessionRecord};
