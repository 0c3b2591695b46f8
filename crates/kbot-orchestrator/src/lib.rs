//! Wires the router, session lifecycle, agent process, channel adapters,
//! and durable stores into the bot's single inbound pipeline
//! (`handle_message`) and its start/stop state machine.

pub mod error;
pub mod orchestrator;
pub mod sinks;
pub mod types;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use sinks::{AnyCoalescer, ChannelEditSink, ChannelSendSink};
pub use types::{
    BotState, OrchestratorEvent, PlatformCapabilities, StaticPlatformCapabilities, SummaryProvider,
    WakeContext,
};
