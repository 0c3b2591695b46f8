use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use kbot_core::Bus;
use kbot_fsutil::LockManager;
use rand::Rng;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{DmPolicyError, Result};
use crate::types::{AccessCheck, DmPolicyEvent, PairingRequest, PolicyMode, RequestStatus};

type PendingIndex = HashMap<String, String>;
type ApprovedIndex = HashSet<String>;

fn request_key(channel: &str, user_id: &str) -> String {
    format!("{channel}|{user_id}")
}

const PAIRING_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_pairing_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| PAIRING_CODE_ALPHABET[rng.gen_range(0..PAIRING_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Gatekeeper for inbound direct messages: per-channel policy, pairing-code
/// approval workflow, and TTL-based expiry. Pending/approved index files and
/// individual request records are YAML under the locked base directory, the
/// same storage idiom `kbot-sessions`/`kbot-conversations` use for their
/// metadata files.
pub struct DmPolicyStore {
    base_dir: PathBuf,
    locks: LockManager,
    policies: DashMap<String, PolicyMode>,
    pairing_ttl: ChronoDuration,
    bus: Bus<DmPolicyEvent>,
}

impl DmPolicyStore {
    pub fn new(base_dir: impl Into<PathBuf>, pairing_ttl_mins: i64) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: LockManager::new(),
            policies: DashMap::new(),
            pairing_ttl: ChronoDuration::minutes(pairing_ttl_mins),
            bus: Bus::new(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DmPolicyEvent> {
        self.bus.subscribe()
    }

    /// Registers a channel pattern (exact, e.g. `discord:dm:u1`, or wildcard,
    /// e.g. `discord:dm:*`) with a policy mode.
    pub fn set_policy(&self, pattern: impl Into<String>, mode: PolicyMode) {
        self.policies.insert(pattern.into(), mode);
    }

    fn resolve_policy(&self, channel: &str) -> PolicyMode {
        if let Some(mode) = self.policies.get(channel) {
            return *mode;
        }
        let mut best: Option<(usize, PolicyMode)> = None;
        for entry in self.policies.iter() {
            let pattern = entry.key();
            if let Some(prefix) = pattern.strip_suffix('*') {
                if channel.starts_with(prefix) {
                    let specificity = prefix.len();
                    if best.map(|(len, _)| specificity > len).unwrap_or(true) {
                        best = Some((specificity, *entry.value()));
                    }
                }
            }
        }
        best.map(|(_, mode)| mode).unwrap_or(PolicyMode::Open)
    }

    fn requests_dir(&self) -> PathBuf {
        self.base_dir.join("dmpolicy").join("requests")
    }

    fn request_path(&self, id: &str) -> PathBuf {
        self.requests_dir().join(format!("{id}.yaml"))
    }

    fn pending_index_path(&self) -> PathBuf {
        self.base_dir.join("dmpolicy").join("pending-index.yaml")
    }

    fn approved_index_path(&self) -> PathBuf {
        self.base_dir.join("dmpolicy").join("approved-index.yaml")
    }

    fn read_yaml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_yaml::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn write_request(&self, req: &PairingRequest) -> Result<()> {
        let yaml = serde_yaml::to_string(req)?;
        kbot_fsutil::atomic_write(&self.request_path(&req.id), yaml.as_bytes())?;
        Ok(())
    }

    fn read_request(&self, id: &str) -> Result<PairingRequest> {
        let path = self.request_path(id);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            DmPolicyError::Fs(kbot_fsutil::FsError::Io {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// `{status: allowed}` for `open` policies or users already approved;
    /// otherwise returns the same pending record on repeated calls until it
    /// resolves.
    #[instrument(skip(self))]
    pub fn check_access(&self, channel: &str, user_id: &str, platform: &str) -> Result<AccessCheck> {
        if self.resolve_policy(channel) == PolicyMode::Open {
            return Ok(AccessCheck::Allowed);
        }

        let key = request_key(channel, user_id);
        let pending_path = self.pending_index_path();
        let approved_path = self.approved_index_path();

        let approved: ApprovedIndex = Self::read_yaml(&approved_path);
        if approved.contains(&key) {
            return Ok(AccessCheck::Allowed);
        }

        self.locks.with_lock(&pending_path, || -> Result<AccessCheck> {
            let mut pending: PendingIndex = Self::read_yaml(&pending_path);
            if let Some(existing_id) = pending.get(&key) {
                return Ok(AccessCheck::Pending(self.read_request(existing_id)?));
            }

            let now = Utc::now();
            let request = PairingRequest {
                id: Uuid::new_v4().to_string(),
                channel: channel.to_string(),
                user_id: user_id.to_string(),
                platform: platform.to_string(),
                code: generate_pairing_code(),
                status: RequestStatus::Pending,
                created_at: now,
                expires_at: now + self.pairing_ttl,
                resolved_at: None,
                reason: None,
            };
            self.write_request(&request)?;
            pending.insert(key, request.id.clone());
            kbot_fsutil::atomic_write(&pending_path, serde_yaml::to_string(&pending)?.as_bytes())?;
            info!(id = %request.id, channel, "dmpolicy:request:created");
            self.bus.emit(DmPolicyEvent::RequestCreated(request.clone()));
            Ok(AccessCheck::Pending(request))
        })
    }

    #[instrument(skip(self))]
    pub fn approve_request(&self, id: &str) -> Result<PairingRequest> {
        let pending_path = self.pending_index_path();
        let approved_path = self.approved_index_path();
        self.locks.with_lock(&pending_path, || -> Result<PairingRequest> {
            let mut request = self.read_request(id)?;
            if request.status != RequestStatus::Pending {
                return Err(DmPolicyError::AlreadyResolved { id: id.to_string() });
            }
            request.status = RequestStatus::Approved;
            request.resolved_at = Some(Utc::now());
            self.write_request(&request)?;

            let key = request_key(&request.channel, &request.user_id);
            let mut pending: PendingIndex = Self::read_yaml(&pending_path);
            pending.remove(&key);
            kbot_fsutil::atomic_write(&pending_path, serde_yaml::to_string(&pending)?.as_bytes())?;

            let mut approved: ApprovedIndex = Self::read_yaml(&approved_path);
            approved.insert(key);
            kbot_fsutil::atomic_write(&approved_path, serde_yaml::to_string(&approved)?.as_bytes())?;

            info!(id, "dmpolicy:request:approved");
            self.bus.emit(DmPolicyEvent::RequestApproved(request.clone()));
            Ok(request)
        })
    }

    #[instrument(skip(self))]
    pub fn reject_request(&self, id: &str, reason: Option<String>) -> Result<PairingRequest> {
        let pending_path = self.pending_index_path();
        self.locks.with_lock(&pending_path, || -> Result<PairingRequest> {
            let mut request = self.read_request(id)?;
            if request.status != RequestStatus::Pending {
                return Err(DmPolicyError::AlreadyResolved { id: id.to_string() });
            }
            request.status = RequestStatus::Rejected;
            request.resolved_at = Some(Utc::now());
            request.reason = reason;
            self.write_request(&request)?;

            let key = request_key(&request.channel, &request.user_id);
            let mut pending: PendingIndex = Self::read_yaml(&pending_path);
            pending.remove(&key);
            kbot_fsutil::atomic_write(&pending_path, serde_yaml::to_string(&pending)?.as_bytes())?;

            info!(id, "dmpolicy:request:rejected");
            self.bus.emit(DmPolicyEvent::RequestRejected(request.clone()));
            Ok(request)
        })
    }

    /// Sweeps every still-pending request past its `expires_at` to `expired`,
    /// emitting one event per swept request.
    #[instrument(skip(self))]
    pub fn cleanup_expired(&self) -> Result<usize> {
        let pending_path = self.pending_index_path();
        self.locks.with_lock(&pending_path, || -> Result<usize> {
            let mut pending: PendingIndex = Self::read_yaml(&pending_path);
            let now = Utc::now();
            let mut expired_keys = Vec::new();

            for (key, id) in pending.iter() {
                let mut request = self.read_request(id)?;
                if request.status == RequestStatus::Pending && request.expires_at < now {
                    request.status = RequestStatus::Expired;
                    request.resolved_at = Some(now);
                    self.write_request(&request)?;
                    expired_keys.push(key.clone());
                    self.bus.emit(DmPolicyEvent::RequestExpired(request));
                }
            }

            for key in &expired_keys {
                pending.remove(key);
            }
            if !expired_keys.is_empty() {
                kbot_fsutil::atomic_write(&pending_path, serde_yaml::to_string(&pending)?.as_bytes())?;
            }
            Ok(expired_keys.len())
        })
    }
}
