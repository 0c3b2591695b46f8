use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Per-absolute-path mutual exclusion.
///
/// The lock is not a property of the stored state (design note §9 — "a lock
/// should not be a property of the stored state, that would require a lock
/// to fetch the lock"). Instead we keep a parallel `map<path -> mutex>`
/// behind a single top-level map mutex, with double-checked creation so the
/// map mutex is only ever held for the instant it takes to look up or insert
/// an `Arc<Mutex<()>>`.
///
/// Concurrent callers of `with_lock(path, fn)` observe serialized execution
/// for the same path; distinct paths proceed independently.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` with exclusive access to `path`. Other callers locking the
    /// same path block until `f` returns; callers locking a different path
    /// proceed in parallel.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let path_lock = self.lock_for(path);
        let _guard = path_lock.lock().expect("per-path lock poisoned");
        f()
    }

    /// Drop the cached mutex for `path`. Safe to call any time — a future
    /// `with_lock` simply recreates it. Used to keep the registry from
    /// growing unbounded across the lifetime of a long-running process.
    pub fn forget(&self, path: &Path) {
        self.locks.lock().expect("lock registry poisoned").remove(path);
    }
}
