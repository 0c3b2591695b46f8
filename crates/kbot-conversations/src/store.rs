use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use kbot_core::{Conversation, ConversationStatus, ConversationTurn};
use kbot_fsutil::{append_line_fsync, atomic_write, LockManager};

use crate::error::{ConversationError, Result};
use crate::types::{
    AppendTurnInput, AppendTurnOutcome, ListConversationsFilter, SessionExistenceCheck,
};

type SessionKeyIndex = HashMap<String, String>;
type MessageIdIndex = HashMap<String, u64>;

/// Append-only per-conversation turn log, idempotent by external message
/// id, indexed by session key.
///
/// Layout: `<base>/conversations/<id>/conversation.yaml` + `turns.jsonl` +
/// `message-id-index.json`, plus one top-level
/// `conversations/session-key-index.json` mapping `session_key →
/// conversation_id`. Both index files are rebuilt by scanning the log if
/// missing or unreadable.
pub struct ConversationStore {
    base_dir: PathBuf,
    locks: LockManager,
    session_check: Option<Arc<dyn SessionExistenceCheck>>,
}

impl ConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: LockManager::new(),
            session_check: None,
        }
    }

    pub fn with_session_check(mut self, check: Arc<dyn SessionExistenceCheck>) -> Self {
        self.session_check = Some(check);
        self
    }

    fn conv_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join("conversations").join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.conv_dir(id).join("conversation.yaml")
    }

    fn turns_path(&self, id: &str) -> PathBuf {
        self.conv_dir(id).join("turns.jsonl")
    }

    fn message_index_path(&self, id: &str) -> PathBuf {
        self.conv_dir(id).join("message-id-index.json")
    }

    fn session_key_index_path(&self) -> PathBuf {
        self.base_dir.join("conversations").join("session-key-index.json")
    }

    fn read_meta(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = read_to_string(&path)?;
        Ok(Some(serde_yaml::from_str(&raw)?))
    }

    fn write_meta(&self, conv: &Conversation) -> Result<()> {
        let path = self.meta_path(&conv.id);
        let yaml = serde_yaml::to_string(conv)?;
        atomic_write(&path, yaml.as_bytes())?;
        Ok(())
    }

    fn read_session_key_index(&self) -> SessionKeyIndex {
        let path = self.session_key_index_path();
        read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write_session_key_index(&self, index: &SessionKeyIndex) -> Result<()> {
        let path = self.session_key_index_path();
        atomic_write(&path, serde_json::to_string(index)?.as_bytes())?;
        Ok(())
    }

    /// `None` when the index file is missing or fails to parse — the
    /// caller rebuilds it from the log in that case.
    fn read_message_index(&self, id: &str) -> Option<MessageIdIndex> {
        let path = self.message_index_path(id);
        read_to_string(&path).ok().and_then(|raw| serde_json::from_str(&raw).ok())
    }

    fn write_message_index(&self, id: &str, index: &MessageIdIndex) -> Result<()> {
        let path = self.message_index_path(id);
        atomic_write(&path, serde_json::to_string(index)?.as_bytes())?;
        Ok(())
    }

    /// Rebuild `message-id-index.json` from `turns.jsonl`, atomically
    /// replacing whatever (if anything) was there.
    fn rebuild_message_index(&self, id: &str) -> Result<MessageIdIndex> {
        let turns = self.read_turns_uncached(id)?;
        let mut index = MessageIdIndex::new();
        for turn in &turns {
            if let Some(message_id) = &turn.message_id {
                index.entry(message_id.clone()).or_insert(turn.seq);
            }
        }
        self.write_message_index(id, &index)?;
        Ok(index)
    }

    /// Creates the directory, initializes empty logs, inserts the
    /// session-key index entry.
    #[instrument(skip(self))]
    pub fn create_conversation(&self, session_key: &str) -> Result<Conversation> {
        let index_path = self.session_key_index_path();
        self.locks.with_lock(&index_path, || -> Result<Conversation> {
            let mut index = self.read_session_key_index();
            if let Some(existing_id) = index.get(session_key) {
                if let Some(existing) = self.read_meta(existing_id)? {
                    return Ok(existing);
                }
            }
            let id = Uuid::now_v7().to_string();
            let now = chrono::Utc::now();
            let conv = Conversation {
                id: id.clone(),
                session_key: session_key.to_string(),
                status: ConversationStatus::Active,
                created_at: now,
                updated_at: now,
                turn_count: 0,
                metadata: None,
            };
            self.write_meta(&conv)?;
            index.insert(session_key.to_string(), id);
            self.write_session_key_index(&index)?;
            debug!(conversation_id = %conv.id, session_key, "conversation:created");
            Ok(conv)
        })
    }

    #[instrument(skip(self))]
    pub fn get_conversation_by_session_key(&self, session_key: &str) -> Result<Option<Conversation>> {
        let index = self.read_session_key_index();
        let Some(id) = index.get(session_key) else {
            return Ok(None);
        };
        self.read_meta(id)
    }

    #[instrument(skip(self))]
    pub fn get_or_create_conversation(&self, session_key: &str) -> Result<Conversation> {
        if let Some(conv) = self.get_conversation_by_session_key(session_key)? {
            return Ok(conv);
        }
        self.create_conversation(session_key)
    }

    #[instrument(skip(self, filter))]
    pub fn list_conversations(&self, filter: ListConversationsFilter) -> Result<Vec<Conversation>> {
        let dir = self.base_dir.join("conversations");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let Some(conv) = self.read_meta(&id)? else {
                continue;
            };
            if let Some(status) = filter.status {
                if conv.status != status {
                    continue;
                }
            }
            out.push(conv);
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub fn archive_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.meta_path(id);
        self.locks.with_lock(&path, || -> Result<Option<Conversation>> {
            let Some(mut conv) = self.read_meta(id)? else {
                return Ok(None);
            };
            conv.status = ConversationStatus::Archived;
            conv.updated_at = chrono::Utc::now();
            self.write_meta(&conv)?;
            Ok(Some(conv))
        })
    }

    /// Appends a turn, honoring the `message_id` idempotence contract: a
    /// duplicate `message_id` returns the existing turn rather than
    /// re-appending.
    #[instrument(skip(self, input), fields(conversation_id = %id))]
    pub fn append_turn(&self, id: &str, input: AppendTurnInput) -> Result<AppendTurnOutcome> {
        let turns_path = self.turns_path(id);
        self.locks
            .with_lock(&turns_path, || -> Result<AppendTurnOutcome> {
                let mut message_index = match self.read_message_index(id) {
                    Some(idx) => idx,
                    None if turns_path.exists() => self.rebuild_message_index(id)?,
                    None => MessageIdIndex::new(),
                };

                if let Some(message_id) = &input.message_id {
                    if let Some(&seq) = message_index.get(message_id) {
                        let existing = self
                            .read_turns_uncached(id)?
                            .into_iter()
                            .find(|t| t.seq == seq)
                            .ok_or_else(|| {
                                ConversationError::Validation(format!(
                                    "message-id index pointed at missing seq {seq}"
                                ))
                            })?;
                        return Ok(AppendTurnOutcome {
                            turn: existing,
                            was_duplicate: true,
                        });
                    }
                }

                input.event_range.validate().map_err(|e| {
                    ConversationError::Validation(e.to_string())
                })?;

                if let Some(check) = &self.session_check {
                    if !check.session_exists(&input.session_id) {
                        return Err(ConversationError::UnknownSession {
                            session_id: input.session_id.clone(),
                        });
                    }
                }

                let Some(mut conv) = self.read_meta(id)? else {
                    return Err(ConversationError::NotFound { id: id.to_string() });
                };

                let turn = ConversationTurn {
                    seq: input.seq.unwrap_or(conv.turn_count),
                    ts: input.ts.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                    role: input.role,
                    session_id: input.session_id,
                    event_range: input.event_range,
                    message_id: input.message_id.clone(),
                    metadata: input.metadata,
                };
                let line = serde_json::to_string(&turn)?;
                append_line_fsync(&turns_path, &line)?;

                conv.turn_count += 1;
                conv.updated_at = chrono::Utc::now();
                self.write_meta(&conv)?;

                if let Some(message_id) = &turn.message_id {
                    message_index.insert(message_id.clone(), turn.seq);
                    self.write_message_index(id, &message_index)?;
                }

                Ok(AppendTurnOutcome {
                    turn,
                    was_duplicate: false,
                })
            })
    }

    fn read_turns_uncached(&self, id: &str) -> Result<Vec<ConversationTurn>> {
        let path = self.turns_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = read_to_string(&path)?;
        let mut turns = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(err) => warn!(lineno, %err, "skipping malformed turn line"),
            }
        }
        turns.sort_by_key(|t| t.seq);
        Ok(turns)
    }

    #[instrument(skip(self))]
    pub fn read_turns(&self, id: &str) -> Result<Vec<ConversationTurn>> {
        let turns_path = self.turns_path(id);
        self.locks.with_lock(&turns_path, || self.read_turns_uncached(id))
    }

    pub fn read_turns_since(
        &self,
        id: &str,
        since: u64,
        until: Option<u64>,
    ) -> Result<Vec<ConversationTurn>> {
        let turns = self.read_turns(id)?;
        Ok(turns
            .into_iter()
            .filter(|t| t.seq >= since && until.is_none_or(|u| t.seq <= u))
            .collect())
    }

    pub fn get_last_turn(&self, id: &str) -> Result<Option<ConversationTurn>> {
        Ok(self.read_turns(id)?.into_iter().last())
    }

    pub fn get_turn_count(&self, id: &str) -> Result<u64> {
        Ok(self.read_turns(id)?.len() as u64)
    }
}

fn read_to_string(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| io_err(path, e))
}

fn io_err(path: &std::path::Path, source: std::io::Error) -> ConversationError {
    ConversationError::Fs(kbot_fsutil::FsError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_core::{EventRange, Role};
    use tempfile::tempdir;

    struct AlwaysExists;
    impl SessionExistenceCheck for AlwaysExists {
        fn session_exists(&self, _session_id: &str) -> bool {
            true
        }
    }

    struct NeverExists;
    impl SessionExistenceCheck for NeverExists {
        fn session_exists(&self, _session_id: &str) -> bool {
            false
        }
    }

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).with_session_check(Arc::new(AlwaysExists));
        (dir, store)
    }

    fn range() -> EventRange {
        EventRange { start_seq: 0, end_seq: 0 }
    }

    #[test]
    fn create_conversation_indexes_by_session_key() {
        let (_dir, store) = store();
        let conv = store.create_conversation("main:discord:user:u1").unwrap();
        let fetched = store
            .get_conversation_by_session_key("main:discord:user:u1")
            .unwrap()
            .unwrap();
        assert_eq!(conv.id, fetched.id);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (_dir, store) = store();
        let a = store.get_or_create_conversation("k1").unwrap();
        let b = store.get_or_create_conversation("k1").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn append_turn_is_idempotent_on_message_id() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        let input = || {
            AppendTurnInput::new(Role::User, "sess1", range()).with_message_id("m1")
        };
        let first = store.append_turn(&conv.id, input()).unwrap();
        let second = store.append_turn(&conv.id, input()).unwrap();
        assert!(!first.was_duplicate);
        assert!(second.was_duplicate);
        assert_eq!(first.turn.seq, second.turn.seq);
        assert_eq!(store.get_turn_count(&conv.id).unwrap(), 1);
    }

    #[test]
    fn append_turn_rejects_inverted_event_range() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        let bad_range = EventRange { start_seq: 5, end_seq: 1 };
        let result = store.append_turn(&conv.id, AppendTurnInput::new(Role::User, "sess1", bad_range));
        assert!(matches!(result, Err(ConversationError::Validation(_))));
    }

    #[test]
    fn append_turn_rejects_unknown_session() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).with_session_check(Arc::new(NeverExists));
        let conv = store.create_conversation("k1").unwrap();
        let result = store.append_turn(&conv.id, AppendTurnInput::new(Role::User, "ghost", range()));
        assert!(matches!(result, Err(ConversationError::UnknownSession { .. })));
    }

    #[test]
    fn turn_count_and_updated_at_bump_on_append() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        store
            .append_turn(&conv.id, AppendTurnInput::new(Role::User, "sess1", range()))
            .unwrap();
        let updated = store.get_conversation_by_session_key("k1").unwrap().unwrap();
        assert_eq!(updated.turn_count, 1);
    }

    #[test]
    fn message_index_rebuilds_when_missing() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        store
            .append_turn(
                &conv.id,
                AppendTurnInput::new(Role::User, "sess1", range()).with_message_id("m1"),
            )
            .unwrap();
        std::fs::remove_file(store.message_index_path(&conv.id)).unwrap();
        let dup = store
            .append_turn(
                &conv.id,
                AppendTurnInput::new(Role::User, "sess1", range()).with_message_id("m1"),
            )
            .unwrap();
        assert!(dup.was_duplicate);
        assert_eq!(store.get_turn_count(&conv.id).unwrap(), 1);
    }

    #[test]
    fn read_turns_skips_malformed_lines() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        store
            .append_turn(&conv.id, AppendTurnInput::new(Role::User, "sess1", range()))
            .unwrap();
        let turns_path = store.turns_path(&conv.id);
        let mut contents = std::fs::read_to_string(&turns_path).unwrap();
        contents.push_str("garbage\n");
        std::fs::write(&turns_path, contents).unwrap();
        assert_eq!(store.read_turns(&conv.id).unwrap().len(), 1);
    }

    #[test]
    fn archive_sets_status() {
        let (_dir, store) = store();
        let conv = store.create_conversation("k1").unwrap();
        let archived = store.archive_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(archived.status, ConversationStatus::Archived);
    }

    #[test]
    fn list_conversations_filters_and_limits() {
        let (_dir, store) = store();
        store.create_conversation("k1").unwrap();
        store.create_conversation("k2").unwrap();
        store.archive_conversation(&store.create_conversation("k3").unwrap().id).unwrap();
        let active = store
            .list_conversations(ListConversationsFilter {
                status: Some(ConversationStatus::Active),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(active.len(), 2);
        let limited = store
            .list_conversations(ListConversationsFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
