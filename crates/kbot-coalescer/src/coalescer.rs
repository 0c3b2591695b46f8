use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::engine::SplitEngine;
use crate::error::{CoalescerError, Result};
use crate::types::{CoalescerConfig, CoalescerSink};

enum Command {
    Push(String),
    Finalize(oneshot::Sender<()>),
    Abort,
}

/// Buffered coalescer: a mutex-free single consumer task owns the
/// [`SplitEngine`], driven by an unbounded command channel. Producers
/// `push` without waiting on the consumer; `complete` awaits it so callers
/// know every chunk has been handed to the sink before returning.
pub struct Coalescer {
    tx: mpsc::UnboundedSender<Command>,
}

impl Coalescer {
    pub fn new(config: CoalescerConfig, sink: Arc<dyn CoalescerSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            let mut engine = SplitEngine::new(config);
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Push(text) => {
                        for chunk in engine.push(&text) {
                            sink.on_chunk(&chunk);
                        }
                    }
                    Command::Finalize(ack) => {
                        let full = engine.full_text().to_string();
                        for chunk in engine.finalize() {
                            sink.on_chunk(&chunk);
                        }
                        sink.on_complete(&full);
                        let _ = ack.send(());
                    }
                    Command::Abort => engine.abort(),
                }
            }
        });
        Self { tx }
    }

    /// Feeds the latest accumulated text. Never blocks on the consumer.
    pub fn push(&self, full_text: impl Into<String>) -> Result<()> {
        self.tx
            .send(Command::Push(full_text.into()))
            .map_err(|_| CoalescerError::ConsumerGone)
    }

    /// Flushes any residual buffered content and fires `on_complete`,
    /// awaiting the consumer so every chunk is guaranteed delivered first.
    pub async fn complete(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Finalize(ack_tx))
            .map_err(|_| CoalescerError::ConsumerGone)?;
        ack_rx.await.map_err(|_| CoalescerError::ConsumerGone)
    }

    /// Discards in-flight buffered content without emitting it.
    pub fn abort(&self) -> Result<()> {
        self.tx.send(Command::Abort).map_err(|_| CoalescerError::ConsumerGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        chunks: Mutex<Vec<String>>,
        completed: Mutex<Option<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { chunks: Mutex::new(Vec::new()), completed: Mutex::new(None) })
        }
    }

    impl CoalescerSink for RecordingSink {
        fn on_chunk(&self, delta: &str) {
            self.chunks.lock().unwrap().push(delta.to_string());
        }

        fn on_complete(&self, full: &str) {
            *self.completed.lock().unwrap() = Some(full.to_string());
        }
    }

    #[tokio::test]
    async fn complete_flushes_residual_buffer_and_fires_on_complete() {
        let sink = RecordingSink::new();
        let coalescer = Coalescer::new(CoalescerConfig { max_len: 2000, soft_limit: 1800 }, sink.clone());
        coalescer.push("hello world").unwrap();
        coalescer.complete().await.unwrap();

        assert_eq!(sink.chunks.lock().unwrap().as_slice(), ["hello world"]);
        assert_eq!(sink.completed.lock().unwrap().as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn push_past_max_len_emits_chunks_before_complete() {
        let sink = RecordingSink::new();
        let coalescer = Coalescer::new(CoalescerConfig { max_len: 10, soft_limit: 5 }, sink.clone());
        coalescer.push("a".repeat(12)).unwrap();
        coalescer.complete().await.unwrap();
        assert!(!sink.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_discards_buffer() {
        let sink = RecordingSink::new();
        let coalescer = Coalescer::new(CoalescerConfig { max_len: 2000, soft_limit: 1800 }, sink.clone());
        coalescer.push("partial").unwrap();
        coalescer.abort().unwrap();
        coalescer.complete().await.unwrap();
        assert!(sink.chunks.lock().unwrap().is_empty());
        assert_eq!(sink.completed.lock().unwrap().as_deref(), Some(""));
    }
}
