use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of per-key async mutexes.
///
/// Operations on the same key run one at a time; distinct keys never wait on
/// each other. Slots are created on demand and dropped with their last user.
#[derive(Debug, Default)]
pub struct KeyedLock {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while an operation owns a key. Releasing happens in `Drop`, so a
/// panicking or cancelled operation gives the key back as well.
pub struct KeyGuard<'a> {
    table: &'a KeyedLock,
    key: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        // Built before awaiting so a dropped waiter still cleans up its slot
        let mut pending = KeyGuard {
            table: self,
            key: key.to_string(),
            slot: Arc::clone(&slot),
            guard: None,
        };
        pending.guard = Some(slot.lock_owned().await);
        pending
    }

    /// Run `op` while holding the lock for `key`.
    ///
    /// `op` must not lock the same key again: the mutex is not reentrant.
    pub async fn with_lock<F, Fut, R>(&self, key: &str, op: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let _guard = self.lock(key).await;
        op().await
    }

    /// Number of keys currently locked or waited on
    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut slots = self
            .table
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one here: nobody else is waiting
        if let Some(slot) = slots.get(&self.key) {
            if Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2 {
                slots.remove(&self.key);
            }
        }
    }
}
