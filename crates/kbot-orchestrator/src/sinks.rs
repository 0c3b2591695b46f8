use std::sync::{Arc, Mutex as StdMutex};

use tracing::warn;

use kbot_channels::ChannelLifecycle;
use kbot_coalescer::{Coalescer, CoalescerSink, EditCoalescer, EditSink};

/// Feeds a buffered [`Coalescer`]'s chunks into a channel as one new
/// message per chunk.
pub struct ChannelSendSink {
    lifecycle: Arc<ChannelLifecycle>,
    channel: String,
}

impl ChannelSendSink {
    pub fn new(lifecycle: Arc<ChannelLifecycle>, channel: impl Into<String>) -> Self {
        Self { lifecycle, channel: channel.into() }
    }
}

impl CoalescerSink for ChannelSendSink {
    fn on_chunk(&self, delta: &str) {
        let lifecycle = self.lifecycle.clone();
        let channel = self.channel.clone();
        let text = delta.to_string();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.send(&channel, &text, None).await {
                warn!(channel, error = %e, "failed to send coalesced chunk");
            }
        });
    }

    fn on_complete(&self, _full: &str) {}
}

/// Feeds an [`EditCoalescer`] into a channel that supports editing: the
/// first write sends a new message, every subsequent one edits it in
/// place until the coalescer itself starts a fresh message on overflow.
pub struct ChannelEditSink {
    lifecycle: Arc<ChannelLifecycle>,
    channel: String,
    current_message_id: Arc<StdMutex<Option<String>>>,
}

impl ChannelEditSink {
    pub fn new(lifecycle: Arc<ChannelLifecycle>, channel: impl Into<String>) -> Self {
        Self { lifecycle, channel: channel.into(), current_message_id: Arc::new(StdMutex::new(None)) }
    }

    fn dispatch(&self, text: &str, force_new: bool) {
        let lifecycle = self.lifecycle.clone();
        let channel = self.channel.clone();
        let current_message_id = self.current_message_id.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            let existing = if force_new { None } else { current_message_id.lock().unwrap().clone() };
            match existing {
                Some(id) => {
                    if let Err(e) = lifecycle.edit(&channel, &id, &text).await {
                        warn!(channel, error = %e, "failed to edit coalesced message");
                    }
                }
                None => match lifecycle.send(&channel, &text, None).await {
                    Ok(id) => *current_message_id.lock().unwrap() = Some(id),
                    Err(e) => warn!(channel, error = %e, "failed to send coalesced message"),
                },
            }
        });
    }
}

impl EditSink for ChannelEditSink {
    fn edit_current(&self, cumulative: &str) {
        self.dispatch(cumulative, false);
    }

    fn start_new(&self, overflow: &str) {
        self.dispatch(overflow, true);
    }
}

/// Either coalescer variant, so `handle_message` can build the one the
/// target platform calls for without branching at every call site.
pub enum AnyCoalescer {
    Buffered(Coalescer),
    Edit(EditCoalescer),
}

impl AnyCoalescer {
    pub fn push(&self, full_text: &str) {
        match self {
            Self::Buffered(c) => {
                let _ = c.push(full_text.to_string());
            }
            Self::Edit(c) => c.push(full_text),
        }
    }

    /// No-op for the edit variant: every push already reflects the
    /// cumulative text, there is nothing left to flush.
    pub async fn complete(&self) {
        if let Self::Buffered(c) = self {
            let _ = c.complete().await;
        }
    }

    pub fn abort(&self) {
        match self {
            Self::Buffered(c) => {
                let _ = c.abort();
            }
            Self::Edit(c) => c.abort(),
        }
    }
}
