//! Owns the spawned agent subprocess: spawn, periodic liveness probing,
//! restart with a bounded recovery budget, and escalation. The concrete wire
//! protocol spoken to the process is injected by callers via
//! [`ClientFactory`].

pub mod client_factory;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use client_factory::ClientFactory;
pub use error::{AgentError, Result};
pub use lifecycle::AgentLifecycle;
pub use types::{AgentEvent, AgentLifecycleConfig, AgentLifecycleState, HealthSnapshot};
