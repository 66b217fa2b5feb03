//! Per-group exclusion locks

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Lock handed out per group key
pub type GroupLock = Arc<tokio::sync::Mutex<()>>;

/// Lazily creates one lock per group key
///
/// The registry mutex only guards lookup and insertion; the returned lock is
/// an async mutex that callers hold across awaits. Locks are never removed,
/// which is fine while group keys are a small administrative set.
#[derive(Debug, Default)]
pub struct GroupLockRegistry {
    locks: Mutex<HashMap<String, GroupLock>>,
}

impl GroupLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it on first use
    pub fn lock_for(&self, key: &str) -> GroupLock {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key) {
            return Arc::clone(lock);
        }

        debug!(%key, known = locks.len(), "GroupLockRegistry::lock_for: creating lock");
        let lock = GroupLock::default();
        locks.insert(key.to_string(), Arc::clone(&lock));
        lock
    }

    /// Number of distinct groups seen
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Whether some holder currently owns the group's lock
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
