use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use kbot_conversations::ConversationStore;
use kbot_core::{AgentRpcClient, AgentSessionStatus, Bus, NewSessionParams};
use kbot_sessions::SessionStore;

use crate::error::Result;
use crate::types::{GetOrCreateOutcome, LifecycleEvent, SessionState};

const DEFAULT_ROTATION_THRESHOLD: f64 = 0.7;

/// Owns the per-session-key map `{key → SessionState}` and decides
/// rotation/recovery. All state transitions for a key run inside the
/// key's lock (a `tokio::sync::Mutex` wrapping the slot, looked up
/// through a `DashMap` with double-checked creation); transitions on
/// different keys proceed in parallel.
pub struct SessionLifecycleManager {
    slots: DashMap<String, Arc<Mutex<Option<SessionState>>>>,
    rotation_threshold: f64,
    bus: Bus<LifecycleEvent>,
}

impl Default for SessionLifecycleManager {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATION_THRESHOLD)
    }
}

impl SessionLifecycleManager {
    pub fn new(rotation_threshold: f64) -> Self {
        Self {
            slots: DashMap::new(),
            rotation_threshold,
            bus: Bus::new(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    fn slot_for(&self, key: &str) -> Arc<Mutex<Option<SessionState>>> {
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Resolves the active agent-session for `key`, opening or recovering
    /// one via `rpc` and the durable stores when no in-memory entry
    /// exists, and rotating when the current entry's
    /// `context_usage_fraction` meets the rotation threshold.
    #[instrument(skip(self, rpc, conv_store, session_store), fields(key))]
    pub async fn get_or_create_session(
        &self,
        key: &str,
        agent_type: &str,
        rpc: &dyn AgentRpcClient,
        conv_store: &ConversationStore,
        session_store: &SessionStore,
    ) -> Result<GetOrCreateOutcome> {
        let slot = self.slot_for(key);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_mut() {
            if existing.context_usage_fraction >= self.rotation_threshold {
                let old_id = existing.acp_session_id.clone();
                session_store.update_session_status(&old_id, AgentSessionStatus::Completed)?;
                let new_id = rpc
                    .new_session(NewSessionParams {
                        agent_type: agent_type.to_string(),
                        conversation_id: existing.conversation_id.clone(),
                        session_key: Some(key.to_string()),
                    })
                    .await?;
                existing.acp_session_id = new_id.clone();
                existing.context_usage_fraction = 0.0;
                self.bus.emit(LifecycleEvent::SessionRotated {
                    key: key.to_string(),
                    old_session_id: old_id,
                    new_session_id: new_id,
                });
                debug!(key, "session:rotated");
                return Ok(GetOrCreateOutcome {
                    state: existing.clone(),
                    is_new: false,
                    was_rotated: true,
                    was_recovered: false,
                });
            }
            return Ok(GetOrCreateOutcome {
                state: existing.clone(),
                is_new: false,
                was_rotated: false,
                was_recovered: false,
            });
        }

        let conversation = conv_store.get_conversation_by_session_key(key)?;

        if let Some(conv) = &conversation {
            match self.try_recover(conv, conv_store, session_store) {
                Ok(Some(state)) => {
                    *guard = Some(state.clone());
                    self.bus.emit(LifecycleEvent::SessionRecovered {
                        key: key.to_string(),
                        session_id: state.acp_session_id.clone(),
                    });
                    return Ok(GetOrCreateOutcome {
                        state,
                        is_new: false,
                        was_rotated: false,
                        was_recovered: true,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key, %err, "session:restore:error");
                    self.bus.emit(LifecycleEvent::SessionRestoreError {
                        key: key.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let new_id = rpc
            .new_session(NewSessionParams {
                agent_type: agent_type.to_string(),
                conversation_id: conversation.as_ref().map(|c| c.id.clone()),
                session_key: Some(key.to_string()),
            })
            .await?;
        let state = SessionState {
            acp_session_id: new_id.clone(),
            conversation_id: conversation.map(|c| c.id),
            context_usage_fraction: 0.0,
            created_at: chrono::Utc::now(),
        };
        *guard = Some(state.clone());
        self.bus.emit(LifecycleEvent::SessionCreated {
            key: key.to_string(),
            session_id: new_id,
        });
        Ok(GetOrCreateOutcome {
            state,
            is_new: true,
            was_rotated: false,
            was_recovered: false,
        })
    }

    /// Attempts recovery: the conversation's last turn must name an agent
    /// session the session store still reports as `active`. `Ok(None)`
    /// means no recoverable state was found (fall through to opening a
    /// fresh session), `Err` means the lookup itself failed.
    fn try_recover(
        &self,
        conv: &kbot_core::Conversation,
        conv_store: &ConversationStore,
        session_store: &SessionStore,
    ) -> Result<Option<SessionState>> {
        let Some(last_turn) = conv_store.get_last_turn(&conv.id)? else {
            return Ok(None);
        };
        let Some(session) = session_store.get_session(&last_turn.session_id)? else {
            return Ok(None);
        };
        if session.status != AgentSessionStatus::Active {
            return Ok(None);
        }
        Ok(Some(SessionState {
            acp_session_id: session.id,
            conversation_id: Some(conv.id.clone()),
            context_usage_fraction: 0.0,
            created_at: chrono::Utc::now(),
        }))
    }

    /// Mutates the tracked usage fraction in place; a subsequent
    /// `get_or_create_session` may rotate as a result.
    #[instrument(skip(self))]
    pub async fn update_context_usage(&self, key: &str, fraction: f64) {
        let slot = self.slot_for(key);
        let mut guard = slot.lock().await;
        if let Some(state) = guard.as_mut() {
            state.context_usage_fraction = fraction;
        }
    }

    /// Removes the in-memory entry for `key`.
    #[instrument(skip(self))]
    pub fn end_session(&self, key: &str) {
        self.slots.remove(key);
    }

    pub fn active_key_count(&self) -> usize {
        self.slots.len()
    }

    /// Removes and returns every tracked entry. Used during shutdown to
    /// mark each active agent session `completed` before the lifecycle
    /// map is torn down.
    #[instrument(skip(self))]
    pub async fn drain_all(&self) -> Vec<(String, SessionState)> {
        let keys: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                if let Some(state) = slot.lock().await.take() {
                    drained.push((key, state));
                }
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use kbot_core::{AgentSessionStatus as Status, PromptRequest, PromptResponse, SessionUpdate};
    use kbot_sessions::CreateSessionInput;
    use tempfile::tempdir;

    struct StubRpc {
        next_id: AtomicU32,
    }

    impl StubRpc {
        fn new() -> Self {
            Self { next_id: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl AgentRpcClient for StubRpc {
        async fn new_session(&self, _params: NewSessionParams) -> kbot_core::rpc::Result<String> {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("stub-session-{n}"))
        }

        async fn prompt(&self, _req: PromptRequest) -> kbot_core::rpc::Result<PromptResponse> {
            Ok(PromptResponse::default())
        }

        fn subscribe(&self, _session_id: &str) -> tokio::sync::mpsc::Receiver<SessionUpdate> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        }
    }

    fn stores() -> (tempfile::TempDir, SessionStore, ConversationStore) {
        let dir = tempdir().unwrap();
        let sessions = SessionStore::new(dir.path());
        let conversations = ConversationStore::new(dir.path());
        (dir, sessions, conversations)
    }

    #[tokio::test]
    async fn opens_new_session_when_no_entry_exists() {
        let (_dir, sessions, conversations) = stores();
        let rpc = StubRpc::new();
        let manager = SessionLifecycleManager::new(DEFAULT_ROTATION_THRESHOLD);
        let outcome = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        assert!(outcome.is_new);
        assert!(!outcome.was_rotated);
        assert!(!outcome.was_recovered);
    }

    #[tokio::test]
    async fn repeat_call_returns_same_state_without_reopening() {
        let (_dir, sessions, conversations) = stores();
        let rpc = StubRpc::new();
        let manager = SessionLifecycleManager::new(DEFAULT_ROTATION_THRESHOLD);
        let first = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        let second = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        assert_eq!(first.state.acp_session_id, second.state.acp_session_id);
        assert!(!second.is_new);
    }

    #[tokio::test]
    async fn rotates_when_usage_exceeds_threshold() {
        let (_dir, sessions, conversations) = stores();
        let rpc = StubRpc::new();
        let manager = SessionLifecycleManager::new(0.7);
        let first = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        manager.update_context_usage("k1", 0.8).await;
        let second = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        assert!(second.was_rotated);
        assert_ne!(first.state.acp_session_id, second.state.acp_session_id);
    }

    #[tokio::test]
    async fn recovers_active_session_from_conversation_history() {
        let (_dir, sessions, conversations) = stores();
        let rpc = StubRpc::new();

        let agent_session = sessions
            .create_session(CreateSessionInput {
                id: "old-session".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: Some("k1".into()),
            })
            .unwrap();
        assert_eq!(agent_session.status, Status::Active);
        let conv = conversations.create_conversation("k1").unwrap();
        conversations
            .append_turn(
                &conv.id,
                kbot_conversations::AppendTurnInput::new(
                    kbot_core::Role::Assistant,
                    "old-session",
                    kbot_core::EventRange { start_seq: 0, end_seq: 0 },
                ),
            )
            .unwrap();

        let manager = SessionLifecycleManager::new(DEFAULT_ROTATION_THRESHOLD);
        let outcome = manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        assert!(outcome.was_recovered);
        assert_eq!(outcome.state.acp_session_id, "old-session");
    }

    #[tokio::test]
    async fn end_session_removes_entry() {
        let (_dir, sessions, conversations) = stores();
        let rpc = StubRpc::new();
        let manager = SessionLifecycleManager::new(DEFAULT_ROTATION_THRESHOLD);
        manager
            .get_or_create_session("k1", "main", &rpc, &conversations, &sessions)
            .await
            .unwrap();
        assert_eq!(manager.active_key_count(), 1);
        manager.end_session("k1");
        assert_eq!(manager.active_key_count(), 0);
    }
}
