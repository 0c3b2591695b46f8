//! In-process registry of named capability providers ("skills"),
//! addressable by id or by capability. Registration validates a skill's
//! descriptor shape before accepting it; execution auto-initializes an
//! unready skill and reports its own failures through a result wrapper
//! rather than `?`.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{Result, SkillsError};
pub use registry::SkillRegistry;
pub use types::{validate_metadata, ExecuteOutcome, Skill, SkillEvent, SkillMetadata, SkillState};
