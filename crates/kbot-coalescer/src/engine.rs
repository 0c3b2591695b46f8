use crate::types::CoalescerConfig;

const FENCE: &str = "```";
const TAIL_FENCE_WINDOW: usize = 100;
const TRUNCATION_MARKER: &str = "... [truncated]";

/// Pure split-decision state machine (spec §4.8). Owns no I/O: `push`
/// returns the chunks to emit for one growth of the accumulating string,
/// `finalize`/`abort` drain or discard whatever remains buffered.
///
/// `committed` always stays a prefix of the last text handed to `push` —
/// chunk text handed back to callers is *decorated* (closing/reopening code
/// fences, truncation markers) independently of how far `committed` has
/// advanced through the raw source.
pub struct SplitEngine {
    config: CoalescerConfig,
    last_full: String,
    committed: usize,
    open_lang: Option<String>,
}

impl SplitEngine {
    pub fn new(config: CoalescerConfig) -> Self {
        Self { config, last_full: String::new(), committed: 0, open_lang: None }
    }

    /// `push`'s decision rule. `full_text` must be the complete accumulated
    /// text so far (not a delta). A `full_text` identical to the previous
    /// push (including two empty-string pushes) is a no-op.
    pub fn push(&mut self, full_text: &str) -> Vec<String> {
        if full_text == self.last_full {
            return Vec::new();
        }
        self.last_full = full_text.to_string();

        let mut chunks = Vec::new();
        loop {
            let pending = &full_text[self.committed..];
            let len = pending.len();

            if len < self.config.soft_limit {
                break;
            }

            if len < self.config.max_len {
                if let Some(split_at) = self.find_tail_opening_fence(pending) {
                    if split_at == 0 {
                        break;
                    }
                    chunks.push(self.consume(pending, split_at, None));
                    continue;
                }
                // Already inside a code block, or no special boundary —
                // either way rule (2) says keep buffering.
                break;
            }

            if len == self.config.max_len {
                chunks.push(self.consume(pending, len, None));
                continue;
            }

            let (raw_len, marker) = split_text(pending, self.config.max_len);
            if raw_len == 0 {
                break;
            }
            chunks.push(self.consume(pending, raw_len, marker));
        }
        chunks
    }

    /// Any residual buffered content, as one or more chunks.
    pub fn finalize(&mut self) -> Vec<String> {
        let full = std::mem::take(&mut self.last_full);
        let pending = full[self.committed..].to_string();
        if pending.is_empty() {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        let mut rest = pending.as_str();
        while !rest.is_empty() {
            if rest.len() <= self.config.max_len {
                chunks.push(self.decorate(rest, rest.len(), None));
                break;
            }
            let (raw_len, marker) = split_text(rest, self.config.max_len);
            let raw_len = raw_len.max(1);
            chunks.push(self.decorate(rest, raw_len, marker));
            rest = &rest[raw_len..];
        }
        chunks
    }

    /// Discards whatever is buffered without emitting it.
    pub fn abort(&mut self) {
        self.last_full.clear();
        self.committed = 0;
        self.open_lang = None;
    }

    /// The full text last handed to `push`.
    pub fn full_text(&self) -> &str {
        &self.last_full
    }

    fn consume(&mut self, pending: &str, raw_len: usize, marker: Option<&str>) -> String {
        let chunk = self.decorate(pending, raw_len, marker);
        self.committed += raw_len;
        chunk
    }

    /// Builds the decorated chunk text for the next `raw_len` bytes of
    /// `pending` and updates `open_lang` fence-tracking state. `marker`, if
    /// present, is inserted before any closing fence this chunk needs —
    /// truncation reads as "content cut short, then the block is closed"
    /// rather than "block closed, then a marker tacked on after".
    fn decorate(&mut self, pending: &str, raw_len: usize, marker: Option<&str>) -> String {
        let raw = &pending[..raw_len];
        let mut decorated = String::new();
        if let Some(lang) = &self.open_lang {
            decorated.push_str(FENCE);
            decorated.push_str(lang);
            decorated.push('\n');
        }
        decorated.push_str(raw);

        for (idx, _) in raw.match_indices(FENCE) {
            match &self.open_lang {
                None => {
                    let after = &raw[idx + FENCE.len()..];
                    let lang_end = after.find('\n').unwrap_or(after.len());
                    self.open_lang = Some(after[..lang_end].to_string());
                }
                Some(_) => self.open_lang = None,
            }
        }

        if let Some(marker) = marker {
            decorated.push_str(marker);
        }

        if self.open_lang.is_some() {
            decorated.push('\n');
            decorated.push_str(FENCE);
        }
        decorated
    }

    /// Looks for an *opening* fence within the last `TAIL_FENCE_WINDOW`
    /// bytes of `pending`. Returns the byte offset to split at (strictly
    /// before the fence) so the fence starts the next chunk.
    fn find_tail_opening_fence(&self, pending: &str) -> Option<usize> {
        if self.open_lang.is_some() {
            return None;
        }
        let window_start = pending.len().saturating_sub(TAIL_FENCE_WINDOW);
        let mut in_block = false;
        let mut best = None;
        for (idx, _) in pending.match_indices(FENCE) {
            if !in_block && idx >= window_start {
                best = Some(idx);
                break;
            }
            in_block = !in_block;
        }
        best
    }
}

/// `split(text, max)`: prefer double newline, then single newline, then a
/// space within the last 20% of `max`; otherwise hard-cut with a truncation
/// marker. Returns the raw byte length to consume and an optional
/// decoration marker to append.
pub(crate) fn split_text(text: &str, max: usize) -> (usize, Option<&'static str>) {
    let window = &text[..max.min(text.len())];

    if let Some(idx) = window.rfind("\n\n") {
        return (idx + 2, None);
    }
    if let Some(idx) = window.rfind('\n') {
        return (idx + 1, None);
    }
    let tail_window_start = max - max / 5;
    if let Some(idx) = window[tail_window_start.min(window.len())..].rfind(' ') {
        return (tail_window_start + idx + 1, None);
    }

    let cut = max.saturating_sub(TRUNCATION_MARKER.len());
    let cut = floor_char_boundary(text, cut.max(1).min(text.len()));
    (cut, Some(TRUNCATION_MARKER))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_below_soft_limit() {
        let mut engine = SplitEngine::new(CoalescerConfig { max_len: 20, soft_limit: 15 });
        let chunks = engine.push("short");
        assert!(chunks.is_empty());
    }

    #[test]
    fn exact_max_len_emits_one_chunk_no_split() {
        let mut engine = SplitEngine::new(CoalescerConfig { max_len: 10, soft_limit: 5 });
        let text = "a".repeat(10);
        let chunks = engine.push(&text);
        // at len == max_len exactly we only split once len >= max_len; a
        // single push delivering exactly max_len content is emitted whole.
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn splits_before_opening_fence_near_tail() {
        let mut engine = SplitEngine::new(CoalescerConfig { max_len: 20, soft_limit: 15 });
        let text = "aaaaaaaaaa\n```js\nconst x=1;\n```\nbye";
        let mut all_chunks = Vec::new();
        for i in 1..=text.len() {
            all_chunks.extend(engine.push(&text[..i]));
        }
        all_chunks.extend(engine.finalize());
        assert!(!all_chunks.is_empty());
        let first = &all_chunks[0];
        assert!(!first.contains("```js\nconst"));
        let fence_chunk = all_chunks.iter().find(|c| c.trim_start().starts_with("```js")).unwrap();
        assert!(fence_chunk.trim_start().starts_with("```js"));
    }

    #[test]
    fn hard_cut_run_with_no_break_point_gets_truncation_marker() {
        let mut engine = SplitEngine::new(CoalescerConfig { max_len: 2000, soft_limit: 1800 });
        let text = "a".repeat(2500);
        let chunks = engine.push(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].ends_with(TRUNCATION_MARKER));
        assert!(chunks[0].len() <= 2000);
    }

    #[test]
    fn unclosed_fence_at_chunk_boundary_is_closed_and_reopened() {
        let mut engine = SplitEngine::new(CoalescerConfig { max_len: 2000, soft_limit: 1800 });
        let text = format!("```rust\n{}", "x".repeat(2500));
        // Streamed in growing increments, as an assistant's output actually
        // arrives, rather than as a single oversized jump.
        let mut chunks = Vec::new();
        for step in (100..=text.len()).step_by(100) {
            chunks.extend(engine.push(&text[..step]));
        }
        chunks.extend(engine.push(&text));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].trim_end().ends_with(FENCE));
        assert!(!chunks[0].trim_end().ends_with("rust\n```"), "chunk should contain content before closing");

        let finalized = engine.finalize();
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].starts_with("```rust\n"));
    }

    #[test]
    fn repeated_identical_push_is_a_no_op() {
        let mut engine = SplitEngine::new(CoalescerConfig::default());
        assert!(engine.push("").is_empty());
        assert!(engine.push("").is_empty());
        assert!(engine.push("hello").len() <= 1);
    }
}
