//! Buffers an assistant's accumulating output into bounded, platform-legal
//! chunks at semantic boundaries, preserving code-block fences across chunk
//! splits. Two variants: [`Coalescer`] (emit-new-message-per-chunk) and
//! [`EditCoalescer`] (edit-the-same-message, for platforms that support it).

pub mod coalescer;
pub mod edit;
pub mod engine;
pub mod error;
pub mod types;

pub use coalescer::Coalescer;
pub use edit::{EditCoalescer, EditSink};
pub use engine::SplitEngine;
pub use error::{CoalescerError, Result};
pub use types::{CoalescerConfig, CoalescerSink, FnSink};
