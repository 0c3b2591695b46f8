use serde_json::Value;

use kbot_core::NormalizedMessage;

use crate::error::Result;

/// Knows how to turn one platform's raw payload shape into the
/// platform-agnostic [`NormalizedMessage`]. Implementations hold all the
/// platform-specific knowledge (field names, content-type checks); the
/// table just dispatches to the right one by platform id.
pub trait Transformer: Send + Sync {
    /// Platform id this transformer handles (e.g. `"discord"`).
    fn platform(&self) -> &str;

    /// Normalize `raw` into a [`NormalizedMessage`], or a typed error when
    /// the content type isn't one this transformer supports.
    fn normalize(&self, raw: &Value) -> Result<NormalizedMessage>;
}
