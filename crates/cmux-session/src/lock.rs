//! Per-key async mutual exclusion
//!
//! `KeyedMutex` hands out one lock per key (usually a workspace id). Waiters
//! suspend on a `tokio::sync::Mutex`, so contenders on the same key queue in
//! FIFO order and distinct keys never block each other. The guard releases on
//! drop, including on early return and unwinding.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// A table of async mutexes indexed by string key
#[derive(Debug, Clone, Default)]
pub struct KeyedMutex {
    locks: Arc<LockTable>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting while another guard for the same key is alive
    pub async fn acquire(&self, key: impl AsRef<str>) -> KeyedGuard {
        let key = key.as_ref().to_string();
        // Clone under the shard lock so cleanup in Drop can see we are waiting
        let lock = self.locks.entry(key.clone()).or_default().value().clone();
        let guard = lock.lock_owned().await;

        KeyedGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Acquire the lock for `key` only if nobody holds it
    pub fn try_acquire(&self, key: impl AsRef<str>) -> Option<KeyedGuard> {
        let key = key.as_ref().to_string();
        let lock = self.locks.entry(key.clone()).or_default().value().clone();
        let guard = lock.try_lock_owned().ok()?;

        Some(KeyedGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(&self.locks),
        })
    }

    /// Whether a guard for `key` is currently held
    pub fn is_locked(&self, key: impl AsRef<str>) -> bool {
        self.locks
            .get(key.as_ref())
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Scoped ownership of one key of a `KeyedMutex`
#[derive(Debug)]
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<LockTable>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table holds the entry when nobody waits on it
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
