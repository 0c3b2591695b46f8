use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents, Message, MessageId, Ready};
use serenity::builder::{CreateMessage, EditMessage};
use serenity::prelude::{Context, EventHandler};
use serenity::Client;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use kbot_channels::{Channel, ChannelError, ChannelStatus, EditOutcome, MessageHandler, Result};
use kbot_core::{NormalizedMessage, Sender};

/// Maximum characters per Discord message (2000 is the hard limit; 1950
/// leaves room for the reply/embed overhead).
const CHUNK_MAX: usize = 1950;

/// Split `text` into chunks of at most [`CHUNK_MAX`] characters, preferring
/// splits on whitespace/newline boundaries over cutting words mid-way.
fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > CHUNK_MAX {
        let window = &remaining[..CHUNK_MAX];
        let split_at = window.rfind('\n').or_else(|| window.rfind(' ')).unwrap_or(CHUNK_MAX);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Remove an `@mention` prefix (e.g. `<@123456789>`) from a message.
fn strip_mention(s: &str) -> &str {
    let trimmed = s.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        if let Some(end) = rest.find('>') {
            return rest[end + 1..].trim_start();
        }
    }
    trimmed
}

fn parse_channel_id(channel: &str) -> Result<ChannelId> {
    channel
        .parse::<u64>()
        .map(ChannelId::new)
        .map_err(|_| ChannelError::SendFailed(format!("invalid discord channel id: {channel}")))
}

struct Handler {
    bot_id: OnceLock<serenity::all::UserId>,
    require_mention: bool,
    dm_allowed: bool,
    on_message: Arc<StdMutex<Option<MessageHandler>>>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        self.connected.store(true, Ordering::SeqCst);
        info!(name = %ready.user.name, "discord bot connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let is_guild = msg.guild_id.is_some();
        if is_guild && self.require_mention {
            let Some(bot_id) = self.bot_id.get() else {
                return;
            };
            if !msg.mentions_user_id(*bot_id) {
                return;
            }
        }
        if !is_guild && !self.dm_allowed {
            return;
        }

        let text = strip_mention(&msg.content).trim().to_string();
        if text.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let handler = self.on_message.lock().unwrap().clone();
        let Some(handler) = handler else {
            return;
        };

        handler(NormalizedMessage {
            id: msg.id.to_string(),
            channel: msg.channel_id.to_string(),
            text,
            sender: Sender {
                id: msg.author.id.to_string(),
                platform: "discord".to_string(),
                display_name: Some(msg.author.name.clone()),
            },
            timestamp: msg.timestamp.unix_timestamp(),
            metadata: None,
        });
    }
}

struct Running {
    http: Arc<serenity::http::Http>,
    shard_manager: Arc<serenity::gateway::ShardManager>,
    gateway_task: JoinHandle<()>,
}

/// Discord [`Channel`] adapter. A single connect attempt per `start()` — the
/// reconnect policy itself lives one layer up, in
/// [`kbot_channels::ChannelLifecycle`], which polls [`Channel::status`] and
/// re-drives `start()`/`stop()` on sustained failure.
pub struct DiscordChannel {
    token: String,
    require_mention: bool,
    dm_allowed: bool,
    on_message: Arc<StdMutex<Option<MessageHandler>>>,
    connected: Arc<AtomicBool>,
    running: StdMutex<Option<Running>>,
}

impl DiscordChannel {
    pub fn new(token: impl Into<String>, require_mention: bool, dm_allowed: bool) -> Self {
        Self {
            token: token.into(),
            require_mention,
            dm_allowed,
            on_message: Arc::new(StdMutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            running: StdMutex::new(None),
        }
    }

    fn http(&self) -> Result<Arc<serenity::http::Http>> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.http.clone())
            .ok_or(ChannelError::ConnectionFailed("not started".into()))
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn platform(&self) -> &str {
        "discord"
    }

    #[instrument(skip(self))]
    async fn start(&mut self) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            bot_id: OnceLock::new(),
            require_mention: self.require_mention,
            dm_allowed: self.dm_allowed,
            on_message: self.on_message.clone(),
            connected: self.connected.clone(),
        };

        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let connected = self.connected.clone();
        let gateway_task = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(error = %e, "discord gateway stopped with error");
            }
            connected.store(false, Ordering::SeqCst);
        });

        *self.running.lock().unwrap() = Some(Running { http, shard_manager, gateway_task });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&mut self) -> Result<()> {
        let running = self.running.lock().unwrap().take();
        let Some(running) = running else {
            return Ok(());
        };
        running.shard_manager.shutdown_all().await;
        running.gateway_task.abort();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_message_handler(&mut self, handler: MessageHandler) {
        *self.on_message.lock().unwrap() = Some(handler);
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel: &str, text: &str, reply_to: Option<&str>) -> Result<String> {
        let http = self.http()?;
        let channel_id = parse_channel_id(channel)?;
        let reply_id = reply_to.and_then(|r| r.parse::<u64>().ok()).map(MessageId::new);

        let mut last_id = String::new();
        for (i, chunk) in split_chunks(text).into_iter().enumerate() {
            let mut builder = CreateMessage::new().content(chunk);
            if i == 0 {
                if let Some(reply_id) = reply_id {
                    builder = builder.reference_message((channel_id, reply_id));
                }
            }
            let sent = channel_id
                .send_message(&http, builder)
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            last_id = sent.id.to_string();
        }
        Ok(last_id)
    }

    #[instrument(skip(self, text))]
    async fn edit_message(&self, channel: &str, message_id: &str, text: &str) -> Result<EditOutcome> {
        let http = self.http()?;
        let channel_id = parse_channel_id(channel)?;
        let message_id_u64: u64 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid discord message id: {message_id}")))?;

        let mut chunks = split_chunks(text).into_iter();
        let first = chunks.next().unwrap_or_default();
        channel_id
            .edit_message(&http, MessageId::new(message_id_u64), EditMessage::new().content(first))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let mut overflow_ids = Vec::new();
        for chunk in chunks {
            let sent = channel_id
                .send_message(&http, CreateMessage::new().content(chunk))
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            overflow_ids.push(sent.id.to_string());
        }

        Ok(EditOutcome { edited_id: message_id.to_string(), overflow_ids })
    }

    async fn send_typing(&self, channel: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = parse_channel_id(channel)?;
        channel_id
            .broadcast_typing(&http)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    fn status(&self) -> ChannelStatus {
        let running = self.running.lock().unwrap().is_some();
        if running && self.connected.load(Ordering::SeqCst) {
            ChannelStatus::Connected
        } else {
            ChannelStatus::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline() {
        let line = "a".repeat(1000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn very_long_word_still_splits() {
        let text = "x".repeat(4000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn strip_mention_removes_leading_ping() {
        assert_eq!(strip_mention("<@12345> hello"), "hello");
        assert_eq!(strip_mention("no mention here"), "no mention here");
    }

    #[test]
    fn new_channel_starts_disconnected() {
        let channel = DiscordChannel::new("token", true, false);
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
    }
}
