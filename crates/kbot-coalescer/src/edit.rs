use std::sync::{Arc, Mutex};

use crate::engine::split_text;
use crate::types::CoalescerConfig;

/// Callback surface for the edit-based variant: a platform whose channel
/// adapter supports editing an already-sent message in place.
pub trait EditSink: Send + Sync {
    /// Replace the current outbound message's content with `cumulative`.
    fn edit_current(&self, cumulative: &str);
    /// The current message is full; start a new one with `overflow`.
    fn start_new(&self, overflow: &str);
}

struct State {
    last_full: String,
    current_start: usize,
}

/// Edit-based coalescer: edits one outbound message with the cumulative
/// text until it exceeds `max_len`, then starts a new message for the
/// overflow. No code-fence awareness — editing a single message in place
/// means there's no chunk boundary to protect a fence across.
pub struct EditCoalescer {
    config: CoalescerConfig,
    sink: Arc<dyn EditSink>,
    state: Mutex<State>,
}

impl EditCoalescer {
    pub fn new(config: CoalescerConfig, sink: Arc<dyn EditSink>) -> Self {
        Self { config, sink, state: Mutex::new(State { last_full: String::new(), current_start: 0 }) }
    }

    pub fn push(&self, full_text: &str) {
        let mut state = self.state.lock().unwrap();
        if full_text == state.last_full {
            return;
        }
        state.last_full = full_text.to_string();

        // Within one call, every overflow beyond the first transitions to a
        // message that hasn't been started in the sink yet.
        let mut starting_new_message = false;
        loop {
            let pending = &full_text[state.current_start..];
            if pending.len() <= self.config.max_len {
                if starting_new_message {
                    self.sink.start_new(pending);
                } else {
                    self.sink.edit_current(pending);
                }
                break;
            }

            let (raw_len, marker) = split_text(pending, self.config.max_len);
            let mut content = pending[..raw_len].to_string();
            if let Some(marker) = marker {
                content.push_str(marker);
            }
            if starting_new_message {
                self.sink.start_new(&content);
            } else {
                self.sink.edit_current(&content);
            }
            state.current_start += raw_len;
            starting_new_message = true;
        }
    }

    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_full.clear();
        state.current_start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        edits: StdMutex<Vec<String>>,
        new_messages: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { edits: StdMutex::new(Vec::new()), new_messages: StdMutex::new(Vec::new()) })
        }
    }

    impl EditSink for RecordingSink {
        fn edit_current(&self, cumulative: &str) {
            self.edits.lock().unwrap().push(cumulative.to_string());
        }

        fn start_new(&self, overflow: &str) {
            self.new_messages.lock().unwrap().push(overflow.to_string());
        }
    }

    #[test]
    fn edits_single_message_while_under_max_len() {
        let recorder = RecordingSink::new();
        let coalescer =
            EditCoalescer::new(CoalescerConfig { max_len: 20, soft_limit: 15 }, recorder.clone());
        coalescer.push("hello");
        coalescer.push("hello world");
        assert_eq!(recorder.edits.lock().unwrap().as_slice(), ["hello", "hello world"]);
        assert!(recorder.new_messages.lock().unwrap().is_empty());
    }

    #[test]
    fn overflow_starts_a_new_message() {
        let recorder = RecordingSink::new();
        let coalescer =
            EditCoalescer::new(CoalescerConfig { max_len: 2000, soft_limit: 1800 }, recorder.clone());
        coalescer.push(&"a".repeat(2500));
        assert_eq!(recorder.new_messages.lock().unwrap().len(), 1);
    }
}
