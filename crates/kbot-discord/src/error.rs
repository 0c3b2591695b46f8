use thiserror::Error;

/// Startup-time errors for the Discord adapter, surfaced before a
/// [`crate::DiscordChannel`] exists to report through
/// [`kbot_channels::ChannelError`].
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),
    #[error("no bot token configured")]
    NoToken,
}
