//! Periodic, debounced sampling of an agent session's context-window
//! usage. Probe failures and timeouts are logged, never propagated —
//! callers keep the last known fraction rather than blocking message
//! handling on a stalled probe.

pub mod error;
pub mod tracker;
pub mod types;

pub use error::{ContextError, Result};
pub use tracker::ContextUsageTracker;
pub use types::{ContextTrackerConfig, UsageProbe};
