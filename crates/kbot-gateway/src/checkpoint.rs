//! Reads, validates, and consumes `checkpoint.yaml`: a one-shot restart
//! wake prompt written by an external supervisor. The orchestrator crate
//! deliberately leaves parsing and deletion to its caller (see
//! `kbot_orchestrator::types::WakeContext`'s doc comment) — this is that
//! caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use kbot_orchestrator::WakeContext;

const MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
struct CheckpointFile {
    version: u32,
    #[allow(dead_code)]
    session_id: String,
    #[allow(dead_code)]
    restart_reason: String,
    wake_context: CheckpointWakeContext,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CheckpointWakeContext {
    prompt: String,
    pending_work: Option<String>,
    instructions: Option<String>,
}

fn checkpoint_path(base_dir: &Path) -> PathBuf {
    base_dir.join("checkpoint.yaml")
}

/// Loads and validates `checkpoint.yaml` under `base_dir`, returning `None`
/// if absent, unparseable, on an unsupported version, or older than 24h —
/// any of which is logged and treated as "no checkpoint" rather than a
/// startup failure.
pub fn load(base_dir: &Path) -> Option<WakeContext> {
    let path = checkpoint_path(base_dir);
    let raw = std::fs::read_to_string(&path).ok()?;

    let parsed: CheckpointFile = match serde_yaml::from_str(&raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "checkpoint.yaml unparseable, ignoring");
            let _ = std::fs::remove_file(&path);
            return None;
        }
    };

    if parsed.version != 1 {
        warn!(version = parsed.version, "unsupported checkpoint.yaml version, ignoring");
        let _ = std::fs::remove_file(&path);
        return None;
    }

    let age = Utc::now().signed_duration_since(parsed.created_at);
    if age.num_hours() > MAX_AGE_HOURS {
        warn!(age_hours = age.num_hours(), "checkpoint.yaml too old, ignoring");
        let _ = std::fs::remove_file(&path);
        return None;
    }

    Some(WakeContext {
        prompt: parsed.wake_context.prompt,
        pending_work: parsed.wake_context.pending_work,
        instructions: parsed.wake_context.instructions,
    })
}

/// Deletes `checkpoint.yaml` the moment the orchestrator reports it consumed
/// the wake context, so a crash-loop never replays the same wake prompt.
pub fn consumed_hook(base_dir: PathBuf) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        let _ = std::fs::remove_file(checkpoint_path(&base_dir));
    })
}
