use std::sync::Arc;

use async_trait::async_trait;
use kbot_core::NormalizedMessage;

use crate::error::{ChannelError, Result};
use crate::types::{ChannelStatus, EditOutcome};

/// Callback the adapter invokes for each inbound message it has already
/// normalized and filtered (self-messages excluded).
pub type MessageHandler = Arc<dyn Fn(NormalizedMessage) + Send + Sync>;

/// Minimal capability surface the core depends on (spec component C9). The
/// core must never import a platform SDK directly — every platform detail
/// lives behind this trait, owned by the adapter.
///
/// The adapter owns rate-limit compliance and its own reconnect/backoff is
/// optional; [`crate::lifecycle::ChannelLifecycle`] layers a uniform health
/// check, reconnect policy, and send queue on top regardless of what the
/// adapter does internally.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"discord"`).
    fn platform(&self) -> &str;

    /// Establish the long-lived connection.
    async fn start(&mut self) -> Result<()>;

    /// Gracefully close the connection.
    async fn stop(&mut self) -> Result<()>;

    /// Register the handler invoked for every inbound message. Adapters
    /// normalize and filter before calling it.
    fn set_message_handler(&mut self, handler: MessageHandler);

    /// Deliver a message, returning the platform's id for it.
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String>;

    /// Edit a previously sent message in place. Optional — adapters that
    /// don't support it return [`ChannelError::Unsupported`].
    async fn edit_message(
        &self,
        _channel: &str,
        _message_id: &str,
        _text: &str,
    ) -> Result<EditOutcome> {
        Err(ChannelError::Unsupported("edit_message"))
    }

    /// Best-effort typing indicator. Optional; adapters that don't support
    /// it silently no-op.
    async fn send_typing(&self, _channel: &str) -> Result<()> {
        Ok(())
    }

    /// Current connection status, without blocking.
    fn status(&self) -> ChannelStatus;
}
