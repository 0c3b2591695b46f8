use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use kbot_core::Bus;

use crate::error::{Result, SkillsError};
use crate::types::{validate_metadata, ExecuteOutcome, Skill, SkillEvent, SkillMetadata, SkillState};

struct Entry {
    skill: Box<dyn Skill>,
    metadata: SkillMetadata,
    state: Mutex<SkillState>,
}

/// In-process registry of named capability providers, addressable by id or
/// by capability. Registration validates the skill's descriptor shape
/// before it's accepted; execution auto-initializes an unready skill and
/// never propagates a skill's own failure through `?`.
#[derive(Default)]
pub struct SkillRegistry {
    entries: DashMap<String, Arc<Entry>>,
    by_capability: DashMap<String, Vec<String>>,
    bus: Bus<SkillEvent>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), by_capability: DashMap::new(), bus: Bus::new() }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SkillEvent> {
        self.bus.subscribe()
    }

    fn fail(&self, op: &str, skill_id: Option<&str>, err: SkillsError) -> SkillsError {
        self.bus.emit(SkillEvent::Error {
            error: err.to_string(),
            op: op.to_string(),
            skill_id: skill_id.map(str::to_string),
        });
        err
    }

    /// Validates `skill`'s descriptor shape and rejects duplicate ids.
    #[instrument(skip(self, skill))]
    pub fn register(&self, skill: Box<dyn Skill>) -> Result<()> {
        let metadata = match validate_metadata(&skill.descriptor()) {
            Ok(m) => m,
            Err(e) => return Err(self.fail("register", None, e)),
        };

        if self.entries.contains_key(&metadata.id) {
            return Err(self.fail("register", Some(&metadata.id), SkillsError::DuplicateId(metadata.id.clone())));
        }

        for cap in &metadata.capabilities {
            self.by_capability.entry(cap.clone()).or_default().push(metadata.id.clone());
        }

        let id = metadata.id.clone();
        self.entries.insert(
            id.clone(),
            Arc::new(Entry { skill, metadata, state: Mutex::new(SkillState::Uninitialized) }),
        );
        self.bus.emit(SkillEvent::Registered { id });
        Ok(())
    }

    /// Removes `id` from the registry, disposing it first when `dispose`
    /// is true. A disposal error is logged but doesn't block removal.
    #[instrument(skip(self))]
    pub async fn unregister(&self, id: &str, dispose: bool) -> Result<()> {
        let Some((_, entry)) = self.entries.remove(id) else {
            return Err(self.fail("unregister", Some(id), SkillsError::NotFound(id.to_string())));
        };

        for cap in &entry.metadata.capabilities {
            if let Some(mut ids) = self.by_capability.get_mut(cap) {
                ids.retain(|existing| existing != id);
            }
        }

        if dispose {
            if let Err(e) = entry.skill.dispose().await {
                warn!(skill_id = id, error = %e, "skill disposal failed during unregister");
            }
            *entry.state.lock().await = SkillState::Disposed;
        }

        self.bus.emit(SkillEvent::Unregistered { id: id.to_string() });
        Ok(())
    }

    pub fn get_skill(&self, id: &str) -> Option<SkillMetadata> {
        self.entries.get(id).map(|e| e.metadata.clone())
    }

    pub fn get_skill_by_capability(&self, capability: &str) -> Option<SkillMetadata> {
        let id = self.by_capability.get(capability)?.first().cloned()?;
        self.get_skill(&id)
    }

    pub fn get_skills_by_capability(&self, capability: &str) -> Vec<SkillMetadata> {
        let Some(ids) = self.by_capability.get(capability) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get_skill(id)).collect()
    }

    async fn ensure_ready(&self, id: &str, entry: &Entry) -> Result<()> {
        let mut state = entry.state.lock().await;
        if *state == SkillState::Ready {
            return Ok(());
        }
        *state = SkillState::Initializing;
        match entry.skill.initialize().await {
            Ok(()) => {
                *state = SkillState::Ready;
                Ok(())
            }
            Err(e) => {
                // Auto-init failure leaves the skill registered but
                // uninitialized rather than removing it or retrying.
                *state = SkillState::Uninitialized;
                Err(SkillsError::InitFailed(id.to_string(), e.to_string()))
            }
        }
    }

    /// Auto-initializes `id` if needed, then executes it with `params`.
    /// Never returns a propagated `Err` — every failure path (not found,
    /// auto-init failure, execution failure) is folded into the returned
    /// [`ExecuteOutcome`].
    #[instrument(skip(self, params))]
    pub async fn execute_skill(&self, id: &str, params: Value) -> ExecuteOutcome {
        let Some(entry) = self.entries.get(id).map(|e| e.clone()) else {
            let err = self.fail("executeSkill", Some(id), SkillsError::NotFound(id.to_string()));
            return ExecuteOutcome::Err(err.to_string());
        };

        if let Err(e) = self.ensure_ready(id, &entry).await {
            let err = self.fail("executeSkill", Some(id), e);
            return ExecuteOutcome::Err(err.to_string());
        }

        *entry.state.lock().await = SkillState::Executing;
        self.bus.emit(SkillEvent::ExecuteStart { id: id.to_string() });

        let outcome = match entry.skill.execute(params).await {
            Ok(value) => {
                self.bus.emit(SkillEvent::ExecuteComplete { id: id.to_string() });
                ExecuteOutcome::Ok(value)
            }
            Err(e) => {
                self.bus.emit(SkillEvent::ExecuteError { id: id.to_string(), error: e.to_string() });
                self.fail("executeSkill", Some(id), SkillsError::ExecutionFailed(id.to_string(), e.to_string()));
                ExecuteOutcome::Err(e.to_string())
            }
        };

        *entry.state.lock().await = SkillState::Ready;
        outcome
    }

    /// Executes the first skill registered for `capability`.
    pub async fn execute_by_capability(&self, capability: &str, params: Value) -> ExecuteOutcome {
        match self.get_skill_by_capability(capability) {
            Some(metadata) => self.execute_skill(&metadata.id, params).await,
            None => {
                let err = self.fail(
                    "executeByCapability",
                    None,
                    SkillsError::CapabilityNotFound(capability.to_string()),
                );
                ExecuteOutcome::Err(err.to_string())
            }
        }
    }

    /// Initializes every uninitialized skill, logging (not propagating)
    /// any individual failure.
    pub async fn initialize_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(entry) = self.entries.get(&id).map(|e| e.clone()) {
                if let Err(e) = self.ensure_ready(&id, &entry).await {
                    self.fail("initializeAll", Some(&id), e);
                }
            }
        }
    }

    /// Disposes every registered skill and removes it from the registry.
    pub async fn dispose_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.unregister(&id, true).await {
                warn!(skill_id = id, error = %e, "error during dispose_all");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubSkill {
        id: &'static str,
        capabilities: Vec<&'static str>,
        init_calls: AtomicU32,
        dispose_calls: AtomicU32,
        fail_init: bool,
        fail_execute: bool,
    }

    impl StubSkill {
        fn new(id: &'static str, capabilities: Vec<&'static str>) -> Self {
            Self {
                id,
                capabilities,
                init_calls: AtomicU32::new(0),
                dispose_calls: AtomicU32::new(0),
                fail_init: false,
                fail_execute: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Skill for StubSkill {
        fn descriptor(&self) -> Value {
            json!({
                "id": self.id,
                "name": self.id,
                "description": "a stub skill",
                "version": "0.1.0",
                "capabilities": self.capabilities,
            })
        }

        async fn initialize(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(SkillsError::InitFailed(self.id.to_string(), "boom".to_string()));
            }
            Ok(())
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            if self.fail_execute {
                return Err(SkillsError::ExecutionFailed(self.id.to_string(), "execute boom".to_string()));
            }
            Ok(params)
        }

        async fn dispose(&self) -> Result<()> {
            self.dispose_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let registry = SkillRegistry::new();
        registry.register(Box::new(StubSkill::new("echo", vec!["echo"]))).unwrap();
        let err = registry.register(Box::new(StubSkill::new("echo", vec!["echo"]))).unwrap_err();
        assert!(matches!(err, SkillsError::DuplicateId(id) if id == "echo"));
    }

    #[test]
    fn register_rejects_malformed_descriptor() {
        struct Malformed;
        #[async_trait::async_trait]
        impl Skill for Malformed {
            fn descriptor(&self) -> Value {
                json!({ "id": "bad" })
            }
            async fn initialize(&self) -> Result<()> {
                Ok(())
            }
            async fn execute(&self, params: Value) -> Result<Value> {
                Ok(params)
            }
            async fn dispose(&self) -> Result<()> {
                Ok(())
            }
        }

        let registry = SkillRegistry::new();
        let err = registry.register(Box::new(Malformed)).unwrap_err();
        assert!(matches!(err, SkillsError::MissingField(f) if f == "name"));
    }

    #[tokio::test]
    async fn execute_skill_auto_initializes_then_runs() {
        let registry = SkillRegistry::new();
        registry.register(Box::new(StubSkill::new("echo", vec!["echo"]))).unwrap();

        let outcome = registry.execute_skill("echo", json!({"value": 1})).await;
        assert!(matches!(outcome, ExecuteOutcome::Ok(v) if v == json!({"value": 1})));
        assert_eq!(registry.get_skill("echo").unwrap().id, "echo");
    }

    #[tokio::test]
    async fn execute_skill_missing_returns_err_outcome() {
        let registry = SkillRegistry::new();
        let outcome = registry.execute_skill("nope", json!(null)).await;
        assert!(matches!(outcome, ExecuteOutcome::Err(_)));
    }

    #[tokio::test]
    async fn execute_skill_init_failure_keeps_skill_registered_uninitialized() {
        let registry = SkillRegistry::new();
        let mut skill = StubSkill::new("flaky", vec!["flaky"]);
        skill.fail_init = true;
        registry.register(Box::new(skill)).unwrap();

        let outcome = registry.execute_skill("flaky", json!(null)).await;
        assert!(matches!(outcome, ExecuteOutcome::Err(_)));
        // Still registered — auto-init failure does not deregister the skill.
        assert!(registry.get_skill("flaky").is_some());
    }

    #[tokio::test]
    async fn execute_by_capability_dispatches_to_first_match() {
        let registry = SkillRegistry::new();
        registry.register(Box::new(StubSkill::new("echo", vec!["echo", "debug"]))).unwrap();

        let outcome = registry.execute_by_capability("debug", json!(42)).await;
        assert!(matches!(outcome, ExecuteOutcome::Ok(v) if v == json!(42)));
    }

    #[tokio::test]
    async fn unregister_disposes_and_removes() {
        let registry = SkillRegistry::new();
        registry.register(Box::new(StubSkill::new("echo", vec!["echo"]))).unwrap();
        registry.unregister("echo", true).await.unwrap();
        assert!(registry.get_skill("echo").is_none());
        assert!(registry.get_skills_by_capability("echo").is_empty());
    }

    #[tokio::test]
    async fn initialize_all_and_dispose_all() {
        let registry = SkillRegistry::new();
        registry.register(Box::new(StubSkill::new("a", vec!["x"]))).unwrap();
        registry.register(Box::new(StubSkill::new("b", vec!["x"]))).unwrap();

        registry.initialize_all().await;
        assert_eq!(registry.get_skills_by_capability("x").len(), 2);

        registry.dispose_all().await;
        assert!(registry.get_skill("a").is_none());
        assert!(registry.get_skill("b").is_none());
    }
}
