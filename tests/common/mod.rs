#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use motocache::{
    CacheError, CancellationToken, DataCategory, KeyValueStore, ManualClock, MemoryStore,
    RemoteBackend, RemoteError, SharedClock,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2024-01-01T00:00:00Z
pub const START_MS: i64 = 1_704_067_200_000;

pub fn manual_clock() -> (ManualClock, SharedClock) {
    let clock = ManualClock::new(START_MS);
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

/// Backend whose answers are scripted per key; unscripted calls succeed.
#[derive(Default)]
pub struct MockBackend {
    upsert_script: Mutex<HashMap<String, VecDeque<Result<(), RemoteError>>>>,
    collections: Mutex<HashMap<DataCategory, Value>>,
    failing_fetches: Mutex<HashMap<DataCategory, RemoteError>>,
    upserts: Mutex<Vec<(String, String, Value)>>,
    fetches: Mutex<Vec<(DataCategory, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcomes of the next upserts of `key`
    pub fn script_upserts(&self, key: &str, outcomes: Vec<Result<(), RemoteError>>) {
        self.upsert_script
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn set_collection(&self, category: DataCategory, value: Value) {
        self.collections.lock().unwrap().insert(category, value);
    }

    pub fn fail_fetch(&self, category: DataCategory, error: RemoteError) {
        self.failing_fetches.lock().unwrap().insert(category, error);
    }

    /// Every call sleeps this long first (real time), unless cancelled
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn upserted_keys(&self) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _, _)| key.clone())
            .collect()
    }

    pub fn upserts(&self) -> Vec<(String, String, Value)> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn upsert_count(&self, key: &str) -> usize {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(upserted, _, _)| upserted == key)
            .count()
    }

    pub fn fetches(&self) -> Vec<(DataCategory, String)> {
        self.fetches.lock().unwrap().clone()
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn fetch_collection(
        &self,
        category: DataCategory,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, RemoteError> {
        self.pause(cancel).await?;
        self.fetches
            .lock()
            .unwrap()
            .push((category, owner_id.to_string()));

        if let Some(error) = self.failing_fetches.lock().unwrap().get(&category) {
            return Err(error.clone());
        }
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(&category)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    async fn upsert(
        &self,
        _category: DataCategory,
        owner_id: &str,
        key: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        self.pause(cancel).await?;
        self.upserts
            .lock()
            .unwrap()
            .push((key.to_string(), owner_id.to_string(), payload.clone()));

        self.upsert_script
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|outcomes| outcomes.pop_front())
            .unwrap_or(Ok(()))
    }
}

/// Memory store that can be switched into failing every operation
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Storage("device storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get_item(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.check()?;
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.remove_item(key).await
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        self.check()?;
        self.inner.get_all_keys().await
    }
}
