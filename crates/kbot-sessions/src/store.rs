use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use kbot_core::{AgentSession, AgentSessionStatus, SessionEvent};
use kbot_fsutil::{append_line_fsync, atomic_write, LockManager};

use crate::error::{Result, SessionError};
use crate::types::{AppendEventInput, CreateSessionInput, ListSessionsFilter};

/// Append-only per-agent-session event log, directory-per-session on disk.
///
/// Each session lives at `<base>/sessions/<id>/` containing `session.yaml`
/// (metadata, rewritten atomically) and `events.jsonl` (append-only, one
/// JSON object per line). Concurrent access to the same session is
/// serialized by a per-path lock; distinct sessions proceed in parallel.
pub struct SessionStore {
    base_dir: PathBuf,
    locks: LockManager,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: LockManager::new(),
        }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join("sessions").join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("session.yaml")
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("events.jsonl")
    }

    fn read_meta(&self, id: &str) -> Result<Option<AgentSession>> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            SessionError::Fs(kbot_fsutil::FsError::Io {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        Ok(Some(serde_yaml::from_str(&raw)?))
    }

    fn write_meta(&self, session: &AgentSession) -> Result<()> {
        let path = self.meta_path(&session.id);
        let yaml = serde_yaml::to_string(session)?;
        atomic_write(&path, yaml.as_bytes())?;
        Ok(())
    }

    /// Writes `session.yaml` with `status=active`. Fails if `id` already exists.
    #[instrument(skip(self, input), fields(id = %input.id))]
    pub fn create_session(&self, input: CreateSessionInput) -> Result<AgentSession> {
        let path = self.meta_path(&input.id);
        self.locks.with_lock(&path, || -> Result<AgentSession> {
            if path.exists() {
                return Err(SessionError::AlreadyExists { id: input.id.clone() });
            }
            let session = AgentSession {
                id: input.id,
                agent_type: input.agent_type,
                conversation_id: input.conversation_id,
                session_key: input.session_key,
                status: AgentSessionStatus::Active,
                started_at: chrono::Utc::now(),
                ended_at: None,
            };
            self.write_meta(&session)?;
            Ok(session)
        })
    }

    #[instrument(skip(self))]
    pub fn get_session(&self, id: &str) -> Result<Option<AgentSession>> {
        self.read_meta(id)
    }

    /// Sets `status`, and when terminal, `ended_at = now`. Atomic replace.
    #[instrument(skip(self))]
    pub fn update_session_status(
        &self,
        id: &str,
        status: AgentSessionStatus,
    ) -> Result<Option<AgentSession>> {
        let path = self.meta_path(id);
        self.locks.with_lock(&path, || -> Result<Option<AgentSession>> {
            let Some(mut session) = self.read_meta(id)? else {
                return Ok(None);
            };
            session.status = status;
            if status.is_terminal() {
                session.ended_at = Some(chrono::Utc::now());
            }
            self.write_meta(&session)?;
            Ok(Some(session))
        })
    }

    #[instrument(skip(self, filter))]
    pub fn list_sessions(&self, filter: ListSessionsFilter) -> Result<Vec<AgentSession>> {
        let dir = self.base_dir.join("sessions");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| {
            SessionError::Fs(kbot_fsutil::FsError::Io {
                path: dir.display().to_string(),
                source: e,
            })
        })? {
            let entry = entry.map_err(|e| {
                SessionError::Fs(kbot_fsutil::FsError::Io {
                    path: dir.display().to_string(),
                    source: e,
                })
            })?;
            let id = entry.file_name().to_string_lossy().into_owned();
            let Some(session) = self.read_meta(&id)? else {
                continue;
            };
            if let Some(status) = filter.status {
                if session.status != status {
                    continue;
                }
            }
            if let Some(agent_type) = &filter.agent_type {
                if &session.agent_type != agent_type {
                    continue;
                }
            }
            out.push(session);
        }
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Scans for `status=active` sessions and rewrites each `abandoned` with
    /// `ended_at = now`. Idempotent: running it twice is a no-op the second
    /// time. Run once at process start.
    #[instrument(skip(self))]
    pub fn recover_orphaned_sessions(&self) -> Result<u64> {
        let active = self.list_sessions(ListSessionsFilter {
            status: Some(AgentSessionStatus::Active),
            ..Default::default()
        })?;
        let mut count = 0;
        for session in active {
            if self
                .update_session_status(&session.id, AgentSessionStatus::Abandoned)?
                .is_some()
            {
                count += 1;
            }
        }
        debug!(count, "recovered orphaned sessions");
        Ok(count)
    }

    /// Assigns `ts`/`seq` when absent, appends one JSON line, fsyncs.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub fn append_event(&self, input: AppendEventInput) -> Result<SessionEvent> {
        let events_path = self.events_path(&input.session_id);
        self.locks
            .with_lock(&events_path, || -> Result<SessionEvent> {
                let seq = match input.seq {
                    Some(seq) => seq,
                    None => last_seq(&events_path)?.map(|s| s + 1).unwrap_or(0),
                };
                let event = SessionEvent {
                    event_type: input.event_type,
                    session_id: input.session_id,
                    seq,
                    ts: input.ts.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                    trace_id: input.trace_id,
                    data: input.data,
                };
                let line = serde_json::to_string(&event)?;
                append_line_fsync(&events_path, &line)?;
                Ok(event)
            })
    }

    /// Line-by-line read; a malformed line is skipped with a single warning,
    /// never fatal. Remaining valid lines are stably sorted by `seq`.
    #[instrument(skip(self))]
    pub fn read_events(&self, id: &str) -> Result<Vec<SessionEvent>> {
        let path = self.events_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = self
            .locks
            .with_lock(&path, || std::fs::read_to_string(&path))
            .map_err(|e| {
                SessionError::Fs(kbot_fsutil::FsError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            })?;
        let mut events = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEvent>(line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(lineno, %err, "skipping malformed event line"),
            }
        }
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    pub fn read_events_since(
        &self,
        id: &str,
        since: u64,
        until: Option<u64>,
    ) -> Result<Vec<SessionEvent>> {
        let events = self.read_events(id)?;
        Ok(events
            .into_iter()
            .filter(|e| e.seq >= since && until.is_none_or(|u| e.seq <= u))
            .collect())
    }

    pub fn get_last_event(&self, id: &str) -> Result<Option<SessionEvent>> {
        Ok(self.read_events(id)?.into_iter().last())
    }

    pub fn get_event_count(&self, id: &str) -> Result<u64> {
        Ok(self.read_events(id)?.len() as u64)
    }

    /// A fresh id suitable for a new agent session: time-sortable (UUIDv7).
    pub fn new_session_id() -> String {
        Uuid::now_v7().to_string()
    }
}

fn last_seq(path: &Path) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SessionError::Fs(kbot_fsutil::FsError::Io {
            path: path.display().to_string(),
            source: e,
        })
    })?;
    let mut max: Option<u64> = None;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<SessionEvent>(line) {
            max = Some(max.map_or(event.seq, |m| m.max(event.seq)));
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_core::SessionEventType;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn create_then_get_roundtrips() {
        let (_dir, store) = store();
        let created = store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: Some("main:discord:user:u1".into()),
            })
            .unwrap();
        assert_eq!(created.status, AgentSessionStatus::Active);
        let fetched = store.get_session("s1").unwrap().unwrap();
        assert_eq!(fetched.id, "s1");
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let (_dir, store) = store();
        let input = || CreateSessionInput {
            id: "dup".into(),
            agent_type: "main".into(),
            conversation_id: None,
            session_key: None,
        };
        store.create_session(input()).unwrap();
        assert!(matches!(
            store.create_session(input()),
            Err(SessionError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn update_status_sets_ended_at_on_terminal() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        let updated = store
            .update_session_status("s1", AgentSessionStatus::Completed)
            .unwrap()
            .unwrap();
        assert!(updated.ended_at.is_some());
    }

    #[test]
    fn recover_orphaned_sessions_is_idempotent() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        let first = store.recover_orphaned_sessions().unwrap();
        let second = store.recover_orphaned_sessions().unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(
            store.get_session("s1").unwrap().unwrap().status,
            AgentSessionStatus::Abandoned
        );
    }

    #[test]
    fn append_event_assigns_sequential_seq() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        let e0 = store
            .append_event(AppendEventInput::new(
                "s1",
                SessionEventType::SessionStart,
                serde_json::json!({}),
            ))
            .unwrap();
        let e1 = store
            .append_event(AppendEventInput::new(
                "s1",
                SessionEventType::MessageChunk,
                serde_json::json!({"text": "hi"}),
            ))
            .unwrap();
        assert_eq!(e0.seq, 0);
        assert_eq!(e1.seq, 1);
        assert_eq!(store.get_event_count("s1").unwrap(), 2);
    }

    #[test]
    fn append_event_out_of_order_seq_still_persists_and_resorts() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        let mut input = AppendEventInput::new("s1", SessionEventType::Note, serde_json::json!({}));
        input.seq = Some(5);
        store.append_event(input).unwrap();
        let mut input = AppendEventInput::new("s1", SessionEventType::Note, serde_json::json!({}));
        input.seq = Some(1);
        store.append_event(input).unwrap();
        let events = store.read_events("s1").unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn read_events_skips_malformed_lines() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        store
            .append_event(AppendEventInput::new(
                "s1",
                SessionEventType::Note,
                serde_json::json!({}),
            ))
            .unwrap();
        let events_path = store.events_path("s1");
        let mut contents = std::fs::read_to_string(&events_path).unwrap();
        contents.push_str("not json\n");
        std::fs::write(&events_path, contents).unwrap();
        let events = store.read_events("s1").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn read_events_since_filters_range() {
        let (_dir, store) = store();
        store
            .create_session(CreateSessionInput {
                id: "s1".into(),
                agent_type: "main".into(),
                conversation_id: None,
                session_key: None,
            })
            .unwrap();
        for _ in 0..5 {
            store
                .append_event(AppendEventInput::new(
                    "s1",
                    SessionEventType::Note,
                    serde_json::json!({}),
                ))
                .unwrap();
        }
        let events = store.read_events_since("s1", 2, Some(3)).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn list_sessions_filters_by_status_and_limit() {
        let (_dir, store) = store();
        for i in 0..3 {
            store
                .create_session(CreateSessionInput {
                    id: format!("s{i}"),
                    agent_type: "main".into(),
                    conversation_id: None,
                    session_key: None,
                })
                .unwrap();
        }
        store
            .update_session_status("s0", AgentSessionStatus::Completed)
            .unwrap();
        let active = store
            .list_sessions(ListSessionsFilter {
                status: Some(AgentSessionStatus::Active),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(active.len(), 2);
        let limited = store
            .list_sessions(ListSessionsFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
