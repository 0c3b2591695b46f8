//! The channel adapter contract (platform-agnostic `Channel` trait) plus
//! `ChannelLifecycle`, which layers a uniform health check, reconnect
//! policy, and retrying send queue on top of whatever a given adapter does
//! internally. The core never imports a platform SDK — every platform
//! detail lives behind `Channel`.

pub mod channel;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod types;

pub use channel::{Channel, MessageHandler};
pub use error::{ChannelError, Result};
pub use lifecycle::ChannelLifecycle;
pub use registry::ChannelRegistry;
pub use types::{ChannelEvent, ChannelLifecycleConfig, ChannelStatus, EditOutcome, LifecycleState};
