//! Background synchronization of local mutations to the remote backend.
//!
//! Items are upserted into a queue keyed by `(key, owner_id)`, persisted to
//! the [`KeyValueStore`] after every change, and drained in priority order by
//! periodic cycles. Transient failures back off exponentially; terminal ones
//! and exhausted retries drop the item and leave a failed [`SyncResult`].

use crate::clock::{duration_ms, SharedClock};
use crate::config::SyncConfig;
use crate::error::{CacheError, ConfigError, RemoteError};
use crate::remote::{with_deadline, DataCategory, RemoteBackend};
use crate::store::KeyValueStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod backoff;
pub mod item;

pub use backoff::RetryPolicy;
pub use item::{SyncItem, SyncKey, SyncPriority, SyncResult};

/// Store key holding the persisted queue; outside the cache prefix on purpose
pub const QUEUE_STORAGE_KEY: &str = "@motocache-sync:queue";

const MAX_HISTORY: usize = 100;
/// Share of failures in recent history above which the synchronizer is unhealthy
const UNHEALTHY_FAILURE_RATIO: f64 = 0.5;
/// Shortest wait after a skipped cycle while online
const SKIPPED_CYCLE_WAIT: Duration = Duration::from_secs(1);

/// Queue and health statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub queue_length: usize,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    pub waiting_for_retry: usize,
    pub total_synced: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub cycles: u64,
    /// Cycles that did nothing because sync was offline, disabled or busy
    pub skipped_cycles: u64,
    /// Epoch milliseconds of the last completed cycle
    pub last_sync_at: Option<i64>,
    pub is_syncing: bool,
    pub offline: bool,
    pub success_rate: f64,
    pub average_sync_ms: f64,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    /// Cancelled mid-flight; still queued
    pub deferred: usize,
    /// Not attempted because another cycle ran, sync is disabled or offline
    pub skipped: bool,
}

#[derive(Debug, Default)]
struct SyncCounters {
    synced: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    cycles: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the cycle flag on every exit path
struct CycleFlag<'a>(&'a AtomicBool);

impl Drop for CycleFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable, priority-ordered, retrying write queue
pub struct BackgroundSync<S: KeyValueStore, R: RemoteBackend> {
    store: Arc<S>,
    backend: Arc<R>,
    config: SyncConfig,
    retry: RetryPolicy,
    clock: SharedClock,
    queue: RwLock<HashMap<SyncKey, SyncItem>>,
    history: RwLock<VecDeque<SyncResult>>,
    counters: SyncCounters,
    next_revision: AtomicU64,
    syncing: AtomicBool,
    offline: AtomicBool,
    last_sync_at: RwLock<Option<i64>>,
    /// Wakes the background loop when sync comes back online
    resumed: Notify,
    /// Serializes queue snapshots written to the store
    persist_lock: Mutex<()>,
}

impl<S: KeyValueStore, R: RemoteBackend> BackgroundSync<S, R> {
    pub fn new(
        store: Arc<S>,
        backend: Arc<R>,
        config: SyncConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            backend,
            retry: RetryPolicy::from_config(&config),
            offline: AtomicBool::new(config.offline_mode),
            config,
            clock,
            queue: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            counters: SyncCounters::default(),
            next_revision: AtomicU64::new(1),
            syncing: AtomicBool::new(false),
            last_sync_at: RwLock::new(None),
            resumed: Notify::new(),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Queue `payload` for upload, replacing any pending item with the same
    /// key and owner. Categories listed in `priority_keys` are always high.
    pub async fn add_to_sync_queue(&self, key: &str, payload: Value, owner_id: &str, priority: SyncPriority) {
        let priority = if self.is_priority_key(key) {
            SyncPriority::High
        } else {
            priority
        };
        let now = self.clock.now_ms();
        let item = SyncItem {
            key: key.to_string(),
            payload,
            owner_id: owner_id.to_string(),
            priority,
            last_modified: now,
            retry_count: 0,
            max_retries: self.config.retry_attempts,
            next_attempt_at: now,
            revision: self.next_revision.fetch_add(1, Ordering::Relaxed),
        };

        let replaced = self
            .queue
            .write()
            .await
            .insert(item.sync_key(), item)
            .is_some();
        tracing::debug!(
            "Queued {} for owner {} ({:?}{})",
            key,
            owner_id,
            priority,
            if replaced { ", replaced pending item" } else { "" }
        );

        self.persist().await;
    }

    fn is_priority_key(&self, key: &str) -> bool {
        let category = DataCategory::from_key(key).map(|(category, _)| category.as_str());
        self.config
            .priority_keys
            .iter()
            .any(|priority_key| priority_key == key || Some(priority_key.as_str()) == category)
    }

    /// Run one sync cycle over every due item
    pub async fn sync_now(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        if !self.config.enabled || self.is_offline() {
            tracing::debug!("Sync skipped (disabled or offline)");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            report.skipped = true;
            return report;
        }
        if self.syncing.swap(true, Ordering::AcqRel) {
            tracing::debug!("Sync cycle already running");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            report.skipped = true;
            return report;
        }
        let _flag = CycleFlag(&self.syncing);

        let now = self.clock.now_ms();
        let mut due: Vec<SyncItem> = self
            .queue
            .read()
            .await
            .values()
            .filter(|item| item.is_due(now))
            .cloned()
            .collect();
        due.sort_by(item::cycle_order);

        let batches: Vec<&[SyncItem]> = due.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let attempts = batch.iter().map(|item| self.attempt(item, cancel));
            let outcomes = futures::future::join_all(attempts).await;

            for (item, (outcome, elapsed)) in batch.iter().zip(outcomes) {
                report.attempted += 1;
                self.apply_outcome(item, outcome, elapsed, &mut report).await;
            }

            if index + 1 < batch_count && !self.config.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                }
            }
        }

        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_sync_at.write().await = Some(self.clock.now_ms());
        self.persist().await;

        if report.attempted > 0 {
            tracing::info!(
                "Sync cycle: {} attempted, {} synced, {} retrying, {} failed",
                report.attempted,
                report.succeeded,
                report.retried,
                report.failed
            );
        }
        report
    }

    async fn attempt(&self, item: &SyncItem, cancel: &CancellationToken) -> (Result<(), RemoteError>, Duration) {
        let started = Instant::now();
        let outcome = match DataCategory::from_key(&item.key) {
            Some((category, _)) => {
                with_deadline(
                    self.backend
                        .upsert(category, &item.owner_id, &item.key, &item.payload, cancel),
                    self.config.request_timeout,
                    cancel,
                )
                .await
            }
            None => Err(RemoteError::UnknownEndpoint(item.key.clone())),
        };
        (outcome, started.elapsed())
    }

    async fn apply_outcome(
        &self,
        item: &SyncItem,
        outcome: Result<(), RemoteError>,
        elapsed: Duration,
        report: &mut CycleReport,
    ) {
        let sync_key = item.sync_key();
        let now = self.clock.now_ms();

        match outcome {
            Ok(()) => {
                self.remove_if_unchanged(&sync_key, item.revision).await;
                self.counters.synced.fetch_add(1, Ordering::Relaxed);
                report.succeeded += 1;
                tracing::debug!("Synced {} for owner {}", item.key, item.owner_id);
                self.record(item, true, now, elapsed, None).await;
            }
            Err(RemoteError::Cancelled) => {
                report.deferred += 1;
            }
            Err(e) if e.is_retryable() && item.retries_left() => {
                let delay = self.retry.delay_for(item.retry_count);
                {
                    let mut queue = self.queue.write().await;
                    if let Some(queued) = queue.get_mut(&sync_key) {
                        if queued.revision == item.revision {
                            queued.retry_count += 1;
                            queued.next_attempt_at = now.saturating_add(duration_ms(delay));
                        }
                    }
                }
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                report.retried += 1;
                tracing::debug!(
                    "Sync of {} failed ({}), retry {}/{} in {:?}",
                    item.key,
                    e,
                    item.retry_count + 1,
                    item.max_retries,
                    delay
                );
            }
            Err(e) => {
                self.remove_if_unchanged(&sync_key, item.revision).await;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                report.failed += 1;
                tracing::warn!(
                    "Dropping sync item {} for owner {} after {} retries: {}",
                    item.key,
                    item.owner_id,
                    item.retry_count,
                    e
                );
                self.record(item, false, now, elapsed, Some(e.to_string())).await;
            }
        }
    }

    /// An item re-enqueued while its previous version was in flight stays queued
    async fn remove_if_unchanged(&self, sync_key: &SyncKey, revision: u64) {
        let mut queue = self.queue.write().await;
        if queue.get(sync_key).is_some_and(|queued| queued.revision == revision) {
            queue.remove(sync_key);
        }
    }

    async fn record(&self, item: &SyncItem, success: bool, now: i64, duration: Duration, error: Option<String>) {
        let mut history = self.history.write().await;
        history.push_back(SyncResult {
            key: item.key.clone(),
            owner_id: item.owner_id.clone(),
            success,
            attempted_at: now,
            duration,
            retry_count: item.retry_count,
            error,
        });
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Sync every `sync_interval`, sooner when a retry comes due, and right
    /// away when the device comes back online.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Background sync disabled");
            return None;
        }

        let sync = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut last_skipped = false;
            loop {
                let wait = sync.next_wake(last_skipped).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sync.resumed.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
                last_skipped = sync.sync_now(&cancel).await.skipped;
            }
            tracing::debug!("Background sync stopped");
        }))
    }

    async fn next_wake(&self, last_skipped: bool) -> Duration {
        // Retry gates do not move while offline; only a resume ends the wait
        if self.is_offline() {
            return self.config.sync_interval;
        }
        let floor = if last_skipped {
            SKIPPED_CYCLE_WAIT.min(self.config.sync_interval)
        } else {
            Duration::ZERO
        };

        let now = self.clock.now_ms();
        let earliest_retry = self
            .queue
            .read()
            .await
            .values()
            .filter(|item| item.retry_count > 0)
            .map(|item| item.next_attempt_at)
            .min();

        match earliest_retry {
            Some(at) => {
                let until = Duration::from_millis(at.saturating_sub(now).max(0) as u64);
                until.max(floor).min(self.config.sync_interval)
            }
            None => self.config.sync_interval,
        }
    }

    /// Reload the persisted queue. Items already queued in memory win.
    pub async fn restore(&self) -> Result<usize, CacheError> {
        let Some(raw) = self.store.get_item(QUEUE_STORAGE_KEY).await? else {
            return Ok(0);
        };
        let items: Vec<SyncItem> = serde_json::from_slice(&raw)?;

        let mut restored = 0;
        let mut queue = self.queue.write().await;
        for item in items {
            self.next_revision
                .fetch_max(item.revision + 1, Ordering::Relaxed);
            let sync_key = item.sync_key();
            if !queue.contains_key(&sync_key) {
                queue.insert(sync_key, item);
                restored += 1;
            }
        }
        drop(queue);

        tracing::info!("Restored {} pending sync items", restored);
        Ok(restored)
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let mut items: Vec<SyncItem> = self.queue.read().await.values().cloned().collect();
        items.sort_by(item::cycle_order);

        let raw = match serde_json::to_vec(&items) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize sync queue: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set_item(QUEUE_STORAGE_KEY, Bytes::from(raw)).await {
            tracing::warn!("Failed to persist sync queue: {:?}", e);
        }
    }

    /// Drop every pending item of an owner
    pub async fn remove_owner(&self, owner_id: &str) -> usize {
        let removed = {
            let mut queue = self.queue.write().await;
            let before = queue.len();
            queue.retain(|sync_key, _| sync_key.owner_id != owner_id);
            before - queue.len()
        };
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
        if !offline {
            self.resumed.notify_one();
        }
        tracing::info!("Sync {}", if offline { "paused (offline)" } else { "resumed" });
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn pending(&self, key: &str, owner_id: &str) -> Option<SyncItem> {
        let sync_key = SyncKey {
            key: key.to_string(),
            owner_id: owner_id.to_string(),
        };
        self.queue.read().await.get(&sync_key).cloned()
    }

    /// Queued items in the order the next cycle would attempt them
    pub async fn queue_snapshot(&self) -> Vec<SyncItem> {
        let mut items: Vec<SyncItem> = self.queue.read().await.values().cloned().collect();
        items.sort_by(item::cycle_order);
        items
    }

    pub async fn history(&self) -> Vec<SyncResult> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn stats(&self) -> SyncStats {
        let now = self.clock.now_ms();
        let mut stats = SyncStats {
            total_synced: self.counters.synced.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            total_retries: self.counters.retries.load(Ordering::Relaxed),
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.counters.skipped.load(Ordering::Relaxed),
            last_sync_at: *self.last_sync_at.read().await,
            is_syncing: self.is_syncing(),
            offline: self.is_offline(),
            ..Default::default()
        };

        for item in self.queue.read().await.values() {
            stats.queue_length += 1;
            match item.priority {
                SyncPriority::High => stats.high_priority += 1,
                SyncPriority::Medium => stats.medium_priority += 1,
                SyncPriority::Low => stats.low_priority += 1,
            }
            if !item.is_due(now) {
                stats.waiting_for_retry += 1;
            }
        }

        let history = self.history.read().await;
        if !history.is_empty() {
            let successes = history.iter().filter(|result| result.success).count();
            stats.success_rate = successes as f64 / history.len() as f64;
            stats.average_sync_ms = history
                .iter()
                .map(|result| result.duration.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / history.len() as f64;
        }
        stats
    }

    /// Online and not failing most recent items
    pub async fn is_healthy(&self) -> bool {
        if self.is_offline() {
            return false;
        }
        let history = self.history.read().await;
        if history.is_empty() {
            return true;
        }
        let failures = history.iter().filter(|result| !result.success).count();
        (failures as f64 / history.len() as f64) <= UNHEALTHY_FAILURE_RATIO
    }
}
