//! A minimal typed event bus (design note §9: "a single `bus` interface
//! per component exposing `on`/`off`/`emit`"). Backed by a broadcast
//! channel: `emit` never blocks on subscribers, and a subscriber that
//! falls behind simply misses the oldest buffered events rather than
//! stalling the emitter.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

pub struct Bus<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Bus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events (`on`). Events emitted before this call
    /// are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish an event to every current subscriber. A no-op (not an
    /// error) when nobody is listening.
    pub fn emit(&self, event: T) {
        let _ = self.sender.send(event);
    }
}

impl<T: Clone + Send + 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}
