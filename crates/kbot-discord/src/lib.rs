//! Discord `Channel` adapter (spec component C9's reference
//! implementation). Mention-gating in guilds, DM-allowed gating, and
//! chunked sends live here; reconnect policy and the retrying send queue
//! are the job of [`kbot_channels::ChannelLifecycle`], one layer up.

pub mod channel;
pub mod error;

pub use channel::DiscordChannel;
pub use error::DiscordError;
