//! Per-key lock table
//!
//! Hands out one shared async mutex per key so concurrent requests for the
//! same key serialize on the same lock instance. Locks are never removed:
//! dropping an idle entry would race with a caller that just looked it up
//! and is about to acquire it. Memory therefore grows with the number of
//! distinct keys ever requested.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Shared handle to the exclusive lock of one key
#[derive(Debug, Clone)]
pub struct KeyLock {
    inner: Arc<AsyncMutex<()>>,
}

/// Held lock for one key; released on drop
pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyLock {
    fn new() -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Wait for exclusive access to the key
    ///
    /// The guard may be held across `.await`; dropping it (including when the
    /// owning future is cancelled) releases the lock.
    pub async fn lock(&self) -> KeyGuard {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self) -> Option<KeyGuard> {
        Arc::clone(&self.inner).try_lock_owned().ok()
    }

    /// True if both handles refer to the same underlying lock
    pub fn same_lock(&self, other: &KeyLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Table mapping cache keys to their locks
#[derive(Debug, Default)]
pub struct LockTable {
    /// Guards check-then-create; never held across `.await`
    locks: Mutex<HashMap<String, KeyLock, RandomState>>,
}

impl LockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it on first request
    ///
    /// Every caller asking for the same key gets a handle to the same lock.
    pub fn get_lock(&self, key: &str) -> KeyLock {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key) {
            return lock.clone();
        }

        let lock = KeyLock::new();
        locks.insert(key.to_string(), lock.clone());
        lock
    }

    /// Check if a lock was ever created for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.locks.lock().contains_key(key)
    }

    /// Number of keys with a lock
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Check if no lock was created yet
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
