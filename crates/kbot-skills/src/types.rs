use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SkillsError};

/// Identity and indexing fields a skill must declare. Parsed and validated
/// from a skill's raw [`Skill::descriptor`] before the skill is accepted
/// into the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Required descriptor fields in validation order. `register` reports the
/// *first* field missing from this list, never a batch of all of them.
const REQUIRED_FIELDS: &[(&str, &str)] = &[
    ("id", "string"),
    ("name", "string"),
    ("description", "string"),
    ("version", "string"),
    ("capabilities", "array"),
];

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "array" => value.is_array(),
        _ => false,
    }
}

/// Validate a raw skill descriptor's shape and parse it into [`SkillMetadata`].
///
/// Walks `REQUIRED_FIELDS` in order: the first field absent from `raw`
/// yields [`SkillsError::MissingField`]; the first present field whose JSON
/// type doesn't match yields [`SkillsError::TypeMismatch`]. Both checks run
/// field-by-field so the caller always gets a single, deterministic reason.
pub fn validate_metadata(raw: &Value) -> Result<SkillMetadata> {
    let obj = raw.as_object().ok_or_else(|| SkillsError::MissingField(REQUIRED_FIELDS[0].0.to_string()))?;

    for (field, expected_type) in REQUIRED_FIELDS {
        let Some(value) = obj.get(*field) else {
            return Err(SkillsError::MissingField(field.to_string()));
        };
        if !matches_type(value, expected_type) {
            return Err(SkillsError::TypeMismatch {
                field: field.to_string(),
                expected_type: expected_type.to_string(),
                actual_type: type_name(value).to_string(),
            });
        }
    }

    let capabilities = obj["capabilities"]
        .as_array()
        .expect("validated above")
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str().map(str::to_string).ok_or_else(|| SkillsError::TypeMismatch {
                field: format!("capabilities[{i}]"),
                expected_type: "string".to_string(),
                actual_type: type_name(v).to_string(),
            })
        })
        .collect::<Result<Vec<String>>>()?;

    Ok(SkillMetadata {
        id: obj["id"].as_str().expect("validated above").to_string(),
        name: obj["name"].as_str().expect("validated above").to_string(),
        description: obj["description"].as_str().expect("validated above").to_string(),
        version: obj["version"].as_str().expect("validated above").to_string(),
        capabilities,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillState {
    Uninitialized,
    Initializing,
    Ready,
    Executing,
    Disposed,
}

/// Result of [`crate::registry::SkillRegistry::execute_skill`] — never a
/// propagated error. A skill's own failures are reported here instead of
/// through `?`, matching the registry's "never throws" execute contract.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Ok(Value),
    Err(String),
}

impl ExecuteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecuteOutcome::Ok(_))
    }
}

#[derive(Debug, Clone)]
pub enum SkillEvent {
    Registered { id: String },
    Unregistered { id: String },
    ExecuteStart { id: String },
    ExecuteComplete { id: String },
    ExecuteError { id: String, error: String },
    /// Catch-all funnel for errors raised anywhere in the registry, tagged
    /// with the operation that raised them and the skill id when one
    /// applies.
    Error { error: String, op: String, skill_id: Option<String> },
}

/// A named capability provider. `descriptor` is validated shape-first by
/// the registry (see [`validate_metadata`]) before `initialize` is ever
/// called, so implementors can assume `metadata()` is well-formed once
/// registered.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Raw `{id, name, description, version, capabilities}` descriptor,
    /// validated by the registry at registration time.
    fn descriptor(&self) -> Value;

    async fn initialize(&self) -> Result<()>;

    async fn execute(&self, params: Value) -> Result<Value>;

    async fn dispose(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_descriptor() -> Value {
        json!({
            "id": "echo",
            "name": "Echo",
            "description": "Echoes params back",
            "version": "1.0.0",
            "capabilities": ["echo", "debug"],
        })
    }

    #[test]
    fn validates_well_formed_descriptor() {
        let metadata = validate_metadata(&full_descriptor()).unwrap();
        assert_eq!(metadata.id, "echo");
        assert_eq!(metadata.capabilities, vec!["echo", "debug"]);
    }

    #[test]
    fn reports_first_missing_field_in_declaration_order() {
        let mut descriptor = full_descriptor();
        let obj = descriptor.as_object_mut().unwrap();
        obj.remove("name");
        obj.remove("version");
        let err = validate_metadata(&descriptor).unwrap_err();
        assert!(matches!(err, SkillsError::MissingField(f) if f == "name"));
    }

    #[test]
    fn reports_type_mismatch_with_expected_and_actual() {
        let mut descriptor = full_descriptor();
        descriptor["version"] = json!(1);
        let err = validate_metadata(&descriptor).unwrap_err();
        match err {
            SkillsError::TypeMismatch { field, expected_type, actual_type } => {
                assert_eq!(field, "version");
                assert_eq!(expected_type, "string");
                assert_eq!(actual_type, "number");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn reports_type_mismatch_in_capability_entries() {
        let mut descriptor = full_descriptor();
        descriptor["capabilities"] = json!(["ok", 5]);
        let err = validate_metadata(&descriptor).unwrap_err();
        assert!(matches!(err, SkillsError::TypeMismatch { field, .. } if field == "capabilities[1]"));
    }
}
