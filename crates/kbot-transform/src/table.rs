use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error};

use kbot_core::NormalizedMessage;

use crate::error::TransformError;
use crate::transformer::Transformer;

/// Per-platform transformer table. The only entry point callers need is
/// [`TransformerTable::handle_raw_message`] — it folds the "unsupported
/// content type / missing transformer → logged skip" and "other failure →
/// logged drop" rules in directly, so the orchestrator never has to
/// duplicate that logic at the call site.
#[derive(Default)]
pub struct TransformerTable {
    transformers: DashMap<String, Box<dyn Transformer>>,
}

impl TransformerTable {
    pub fn new() -> Self {
        Self { transformers: DashMap::new() }
    }

    pub fn register(&self, transformer: Box<dyn Transformer>) {
        self.transformers.insert(transformer.platform().to_string(), transformer);
    }

    /// Normalize `raw` for `platform`, without any logging — callers that
    /// want the error value itself (rather than the logged-skip/drop
    /// behavior of [`Self::handle_raw_message`]) should use this directly.
    pub fn normalize(&self, platform: &str, raw: &Value) -> crate::error::Result<NormalizedMessage> {
        let transformer = self
            .transformers
            .get(platform)
            .ok_or_else(|| TransformError::MissingTransformer(platform.to_string()))?;
        transformer.normalize(raw)
    }

    /// Consult the table for `platform` and normalize `raw`.
    ///
    /// `UnsupportedType` and `MissingTransformer` are logged at debug level
    /// and skipped (`None`, not an error the caller must handle). Any other
    /// normalization failure is logged at error level and dropped
    /// (`None`) — `handle_raw_message` never returns an `Err`.
    pub fn handle_raw_message(&self, platform: &str, raw: &Value) -> Option<NormalizedMessage> {
        match self.normalize(platform, raw) {
            Ok(message) => Some(message),
            Err(e @ (TransformError::UnsupportedType(_) | TransformError::MissingTransformer(_))) => {
                debug!(platform, error = %e, "skipping raw message: no applicable transformer");
                None
            }
            Err(e) => {
                error!(platform, error = %e, "dropping raw message: normalization failed");
                None
            }
        }
    }
}
