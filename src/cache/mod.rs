use crate::analytics::AccessAnalytics;
use crate::clock::SharedClock;
use crate::config::CacheConfig;
use crate::error::{CacheError, ConfigError};
use crate::store::KeyValueStore;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub mod entry;
pub mod lock;

use entry::{CacheEntry, EntryMeta, Validity};
use lock::KeyedLock;

/// Prefix of every key this crate manages inside the shared store
pub const KEY_PREFIX: &str = "@motocache:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub size_bytes: u64,
    pub expired_count: usize,
}

/// Versioned, expiring entries on top of a [`KeyValueStore`].
///
/// Reads never fail: a missing, stale, expired, undecodable or unreadable
/// entry is a miss. Invalid entries are deleted on the spot.
pub struct CacheStore<S: KeyValueStore> {
    store: Arc<S>,
    config: CacheConfig,
    clock: SharedClock,
    analytics: Option<Arc<AccessAnalytics>>,
    locks: KeyedLock,
    /// Last write time per owner, epoch milliseconds
    owner_writes: RwLock<HashMap<String, i64>>,
}

impl<S: KeyValueStore> CacheStore<S> {
    pub fn new(store: Arc<S>, config: CacheConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            analytics: None,
            locks: KeyedLock::new(),
            owner_writes: RwLock::new(HashMap::new()),
        })
    }

    /// Report every read to `analytics`
    pub fn with_analytics(mut self, analytics: Arc<AccessAnalytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn storage_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    /// Get a cached value, `None` on miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let entry = self
            .with_lock(key, || self.read_valid::<T>(key))
            .await;
        let hit = entry.is_some();

        if let Some(analytics) = &self.analytics {
            analytics.track_access(key, hit, started.elapsed()).await;
        }

        if hit {
            tracing::debug!("Cache HIT for key: {}", key);
        } else {
            tracing::debug!("Cache MISS for key: {}", key);
        }
        entry.map(|entry| entry.data)
    }

    /// Whether `key` holds a valid entry. Not counted as an access.
    pub async fn is_valid(&self, key: &str) -> bool {
        self.with_lock(key, || async {
            self.read_valid::<serde::de::IgnoredAny>(key).await.is_some()
        })
        .await
    }

    /// Store a value with the default expiry. Storage failures are logged.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, owner_id: Option<&str>) {
        if let Err(e) = self.try_set(key, data, owner_id, self.config.expiry).await {
            tracing::warn!("Failed to cache key {}: {:?}", key, e);
        }
    }

    /// Store a value with an explicit expiry
    pub async fn set_with_expiry<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        owner_id: Option<&str>,
        expiry: Duration,
    ) {
        if let Err(e) = self.try_set(key, data, owner_id, expiry).await {
            tracing::warn!("Failed to cache key {}: {:?}", key, e);
        }
    }

    /// Store a value and report the number of bytes written
    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        owner_id: Option<&str>,
        expiry: Duration,
    ) -> Result<usize, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("empty key".to_string()));
        }

        let now = self.clock.now_ms();
        let entry = CacheEntry::new(
            data,
            now,
            self.config.version,
            expiry,
            owner_id.map(str::to_string),
        );
        let raw = serde_json::to_vec(&entry)?;
        let size = raw.len();

        let storage_key = Self::storage_key(key);
        self.with_lock(key, || async move {
            self.store.set_item(&storage_key, Bytes::from(raw)).await
        })
        .await?;

        if let Some(owner) = owner_id {
            self.owner_writes
                .write()
                .await
                .insert(owner.to_string(), now);
        }
        Ok(size)
    }

    /// Remove a single entry
    pub async fn remove(&self, key: &str) {
        self.with_lock(key, || self.delete(key)).await;
    }

    /// Remove every entry written for `owner_id`, leaving global entries alone
    pub async fn clear_owner_scope(&self, owner_id: &str) -> usize {
        let mut removed = 0;

        for key in self.managed_keys().await {
            let owned = self
                .with_lock(&key, || async {
                    let owned = matches!(
                        self.read_meta(&key).await,
                        Some(Ok(meta)) if meta.owner_id.as_deref() == Some(owner_id)
                    );
                    if owned {
                        self.delete(&key).await;
                    }
                    owned
                })
                .await;
            if owned {
                removed += 1;
            }
        }

        self.owner_writes.write().await.remove(owner_id);
        tracing::debug!("Cleared {} entries for owner {}", removed, owner_id);
        removed
    }

    /// Remove every managed entry. Keys outside the cache prefix survive.
    pub async fn clear_all(&self) -> usize {
        let keys: Vec<String> = self
            .managed_keys()
            .await
            .iter()
            .map(|key| Self::storage_key(key))
            .collect();

        if let Err(e) = self.store.multi_remove(&keys).await {
            tracing::warn!("Failed to clear cache: {:?}", e);
            return 0;
        }

        self.owner_writes.write().await.clear();
        keys.len()
    }

    /// Delete every stale, expired or unreadable entry
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        for key in self.managed_keys().await {
            let invalid = self
                .with_lock(&key, || async {
                    let invalid = match self.read_meta(&key).await {
                        Some(Ok(meta)) => meta.validity(now, self.config.version) != Validity::Valid,
                        Some(Err(_)) => true,
                        None => false,
                    };
                    if invalid {
                        self.delete(&key).await;
                    }
                    invalid
                })
                .await;
            if invalid {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!("Removed {} invalid cache entries", removed);
        }
        removed
    }

    /// Count entries and bytes. The result is also pushed into analytics.
    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let mut stats = CacheStats::default();

        for key in self.managed_keys().await {
            let raw = match self.store.get_item(&Self::storage_key(&key)).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(CacheError::Compression(_)) => {
                    stats.entry_count += 1;
                    stats.expired_count += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Failed to read cache entry {}: {:?}", key, e);
                    continue;
                }
            };

            stats.entry_count += 1;
            stats.size_bytes += raw.len() as u64;
            let valid = serde_json::from_slice::<EntryMeta>(&raw)
                .map(|meta| meta.validity(now, self.config.version) == Validity::Valid)
                .unwrap_or(false);
            if !valid {
                stats.expired_count += 1;
            }
        }

        if let Some(analytics) = &self.analytics {
            analytics
                .update_footprint(stats.size_bytes, stats.expired_count)
                .await;
        }
        stats
    }

    /// Bring the footprint back under the cleanup watermark.
    ///
    /// Invalid entries go first, then the oldest valid ones.
    pub async fn enforce_size_limit(&self) -> usize {
        let watermark = self.config.cleanup_watermark();
        let mut stats = self.stats().await;
        if stats.size_bytes <= watermark {
            return 0;
        }

        let mut evicted = self.cleanup_expired().await;

        let mut by_age = Vec::new();
        for key in self.managed_keys().await {
            if let Ok(Some(raw)) = self.store.get_item(&Self::storage_key(&key)).await {
                if let Ok(meta) = serde_json::from_slice::<EntryMeta>(&raw) {
                    by_age.push((meta.timestamp, key, raw.len() as u64));
                }
            }
        }
        by_age.sort();

        let mut size: u64 = by_age.iter().map(|(_, _, len)| len).sum();
        for (_, key, len) in by_age {
            if size <= watermark {
                break;
            }
            self.remove(&key).await;
            size = size.saturating_sub(len);
            evicted += 1;
        }

        stats = self.stats().await;
        tracing::info!(
            "Evicted {} entries, cache footprint now {} bytes",
            evicted,
            stats.size_bytes
        );
        evicted
    }

    /// Last write time recorded for an owner, epoch milliseconds
    pub async fn last_write(&self, owner_id: &str) -> Option<i64> {
        self.owner_writes.read().await.get(owner_id).copied()
    }

    /// Keys managed by this cache, without the internal prefix
    pub async fn managed_keys(&self) -> Vec<String> {
        match self.store.get_all_keys().await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(KEY_PREFIX).map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list cache keys: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Run `op` while no other cache operation touches `key`.
    ///
    /// `op` must not call back into this store for the same key.
    pub async fn with_lock<F, Fut, R>(&self, key: &str, op: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.locks.with_lock(key, op).await
    }

    async fn read_valid<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get_item(&Self::storage_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(CacheError::Compression(e)) => {
                tracing::warn!("Discarding corrupt cache entry {}: {}", key, e);
                self.delete(key).await;
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {:?}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<T>>(&raw) {
            Ok(entry) => match entry.validity(self.clock.now_ms(), self.config.version) {
                Validity::Valid => Some(entry),
                state => {
                    tracing::debug!("Discarding {:?} cache entry: {}", state, key);
                    self.delete(key).await;
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.delete(key).await;
                None
            }
        }
    }

    /// `None` when there is no entry or the store could not be read.
    /// Entries that exist but cannot be decoded come back as `Some(Err)`.
    async fn read_meta(&self, key: &str) -> Option<Result<EntryMeta, CacheError>> {
        match self.store.get_item(&Self::storage_key(key)).await {
            Ok(Some(raw)) => Some(serde_json::from_slice(&raw).map_err(CacheError::from)),
            Ok(None) => None,
            Err(e @ CacheError::Compression(_)) => Some(Err(e)),
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {:?}", key, e);
                None
            }
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.store.remove_item(&Self::storage_key(key)).await {
            tracing::warn!("Failed to remove cache entry {}: {:?}", key, e);
        }
    }
}
