use crate::analytics::{AccessAnalytics, AccessRecord};
use crate::cache::CacheStore;
use crate::clock::{duration_ms, SharedClock};
use crate::config::PreloadConfig;
use crate::error::ConfigError;
use crate::remote::{with_deadline, DataCategory, RemoteBackend};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const HOUR_MS: f64 = 60.0 * 60.0 * 1000.0;
/// Recency falls linearly to zero over this span since the last access
const RECENCY_HORIZON_MS: f64 = 24.0 * HOUR_MS;
/// Shortest span an average interval is computed over
const MIN_SPAN_MS: i64 = 60_000;
/// Each access is credited at least this much span when computing frequency
const MIN_INTERVAL_PER_ACCESS_MS: i64 = 15 * 60_000;
/// Fewer accesses than this say nothing about a key
const MIN_ACCESS_COUNT: u64 = 3;
/// Accesses per hour that earn a full frequency score
const FULL_FREQUENCY_PER_HOUR: f64 = 10.0;
/// Access count that earns a full volume score
const FULL_VOLUME: f64 = 20.0;
/// Confidence multiplier applied once a key has been served
const SERVED_DECAY: f64 = 0.5;

/// Predicted access behaviour of one key, rebuilt on every analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictivePattern {
    pub key: String,
    pub access_count: u64,
    /// Accesses per hour over the observed span
    pub frequency: f64,
    pub average_interval: Duration,
    /// Epoch milliseconds
    pub next_predicted_access: i64,
    pub confidence: f64,
    pub data_type: Option<DataCategory>,
}

/// Outcome of one preloading pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadReport {
    pub preloaded: usize,
    pub already_cached: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    /// Another pass was already running; nothing was done
    pub busy: bool,
}

/// Derive a pattern from an access record, `None` if the key is not eligible.
pub fn compute_pattern(
    key: &str,
    record: &AccessRecord,
    now: i64,
    analysis_window: Duration,
) -> Option<PredictivePattern> {
    let window_ms = duration_ms(analysis_window);
    let since_last = now.saturating_sub(record.last_accessed_at).max(0);

    if record.access_count < MIN_ACCESS_COUNT || since_last > window_ms {
        return None;
    }

    let max_span_ms = window_ms.max(MIN_SPAN_MS);
    let observed_ms = record
        .last_accessed_at
        .saturating_sub(record.first_accessed_at)
        .clamp(MIN_SPAN_MS, max_span_ms);
    // A burst of reads on one screen is not a habit: volume has to earn the rate
    let count = i64::try_from(record.access_count).unwrap_or(i64::MAX);
    let rate_span_ms = observed_ms
        .max(count.saturating_mul(MIN_INTERVAL_PER_ACCESS_MS))
        .min(max_span_ms);

    let frequency = record.access_count as f64 / (rate_span_ms as f64 / HOUR_MS);
    let average_interval_ms = observed_ms as f64 / record.access_count as f64;
    let next_predicted_access = record
        .last_accessed_at
        .saturating_add(average_interval_ms as i64);

    let recency = (1.0 - since_last as f64 / RECENCY_HORIZON_MS).clamp(0.0, 1.0);
    let frequency_score = (frequency / FULL_FREQUENCY_PER_HOUR).min(1.0);
    let volume = (record.access_count as f64 / FULL_VOLUME).min(1.0);
    let confidence = (0.4 * recency + 0.4 * frequency_score + 0.2 * volume).clamp(0.0, 1.0);

    Some(PredictivePattern {
        key: key.to_string(),
        access_count: record.access_count,
        frequency,
        average_interval: Duration::from_millis(average_interval_ms as u64),
        next_predicted_access,
        confidence,
        data_type: DataCategory::from_key(key).map(|(category, _)| category),
    })
}

/// Learns from access analytics and warms the cache ahead of predicted reads.
///
/// Preloading is best effort: a failed fetch is logged and skipped, and a
/// wrong prediction costs one wasted request.
pub struct PredictivePreloader<S: KeyValueStore, R: RemoteBackend> {
    cache: Arc<CacheStore<S>>,
    analytics: Arc<AccessAnalytics>,
    backend: Arc<R>,
    config: PreloadConfig,
    clock: SharedClock,
    patterns: RwLock<HashMap<String, PredictivePattern>>,
    /// Keys to preload, highest confidence first
    queue: RwLock<Vec<String>>,
    last_analysis: Mutex<Option<i64>>,
    preloading: AtomicBool,
}

/// Clears the single-flight flag on every exit path
struct PreloadingFlag<'a>(&'a AtomicBool);

impl Drop for PreloadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: KeyValueStore, R: RemoteBackend> PredictivePreloader<S, R> {
    pub fn new(
        cache: Arc<CacheStore<S>>,
        analytics: Arc<AccessAnalytics>,
        backend: Arc<R>,
        config: PreloadConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cache,
            analytics,
            backend,
            config,
            clock,
            patterns: RwLock::new(HashMap::new()),
            queue: RwLock::new(Vec::new()),
            last_analysis: Mutex::new(None),
            preloading: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    /// Rebuild every pattern and the preload queue. Returns the queue length.
    pub async fn analyze_patterns(&self) -> usize {
        let now = self.clock.now_ms();
        let records = self.analytics.access_records().await;
        let lookahead_ms = duration_ms(self.config.lookahead);

        let patterns: HashMap<String, PredictivePattern> = records
            .iter()
            .filter_map(|(key, record)| {
                compute_pattern(key, record, now, self.config.analysis_window)
                    .map(|pattern| (key.clone(), pattern))
            })
            .collect();

        let queue: Vec<String> = {
            let mut candidates: Vec<&PredictivePattern> = patterns
                .values()
                .filter(|pattern| {
                    pattern.confidence >= self.config.confidence_threshold
                        && pattern.next_predicted_access <= now.saturating_add(lookahead_ms)
                })
                .collect();
            candidates.sort_by(|a, b| {
                b.confidence
                    .total_cmp(&a.confidence)
                    .then_with(|| a.key.cmp(&b.key))
            });
            candidates.iter().map(|pattern| pattern.key.clone()).collect()
        };

        tracing::debug!(
            "Analyzed {} keys, {} patterns, {} queued for preloading",
            records.len(),
            patterns.len(),
            queue.len()
        );

        let queued = queue.len();
        *self.patterns.write().await = patterns;
        *self.queue.write().await = queue;
        *self.last_analysis.lock().await = Some(now);
        queued
    }

    /// Analyze only if `update_interval` has passed since the last pass
    pub async fn maybe_analyze(&self) -> bool {
        let now = self.clock.now_ms();
        let due = match *self.last_analysis.lock().await {
            Some(last) => now - last >= duration_ms(self.config.update_interval),
            None => true,
        };
        if due {
            self.analyze_patterns().await;
        }
        due
    }

    pub async fn patterns(&self) -> HashMap<String, PredictivePattern> {
        self.patterns.read().await.clone()
    }

    pub async fn pattern(&self, key: &str) -> Option<PredictivePattern> {
        self.patterns.read().await.get(key).cloned()
    }

    pub async fn preload_queue(&self) -> Vec<String> {
        self.queue.read().await.clone()
    }

    pub fn is_preloading(&self) -> bool {
        self.preloading.load(Ordering::Acquire)
    }

    /// Fetch and cache every queued key that is not already cached.
    ///
    /// Keys scoped to another owner are skipped. A call made while another
    /// pass is running returns immediately with `busy` set.
    pub async fn execute_preloading(&self, owner_id: &str, cancel: &CancellationToken) -> PreloadReport {
        let mut report = PreloadReport::default();
        if !self.config.enabled {
            return report;
        }
        if self.preloading.swap(true, Ordering::AcqRel) {
            tracing::debug!("Preloading already in progress");
            report.busy = true;
            return report;
        }
        let _flag = PreloadingFlag(&self.preloading);

        let queue = self.preload_queue().await;
        for key in queue {
            if cancel.is_cancelled() {
                tracing::debug!("Preloading cancelled");
                break;
            }

            let Some((category, key_owner)) = DataCategory::from_key(&key) else {
                report.skipped += 1;
                continue;
            };
            if key_owner.is_some_and(|owner| owner != owner_id) {
                report.skipped += 1;
                continue;
            }

            if self.cache.is_valid(&key).await {
                report.already_cached += 1;
                self.mark_served(&key).await;
                continue;
            }

            let fetched = with_deadline(
                self.backend.fetch_collection(category, owner_id, cancel),
                self.config.request_timeout,
                cancel,
            )
            .await;

            let data = match fetched {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Failed to preload key {}: {}", key, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self
                .cache
                .try_set(&key, &data, key_owner, self.cache.config().expiry)
                .await
            {
                Ok(bytes) => {
                    report.preloaded += 1;
                    report.bytes += bytes as u64;
                    self.mark_served(&key).await;
                    tracing::debug!("Preloaded key: {}", key);
                }
                Err(e) => {
                    tracing::warn!("Failed to cache preloaded key {}: {:?}", key, e);
                    report.failed += 1;
                }
            }

            if report.bytes >= self.config.max_preload_size_bytes {
                tracing::debug!("Preload budget of {} bytes reached", self.config.max_preload_size_bytes);
                break;
            }
        }

        if report.preloaded > 0 || report.failed > 0 {
            tracing::info!(
                "Preloaded {} keys ({} bytes), {} failed",
                report.preloaded,
                report.bytes,
                report.failed
            );
        }
        report
    }

    /// Run analysis and preloading every `update_interval` until cancelled
    pub fn start(self: &Arc<Self>, owner_id: String, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Predictive preloading disabled");
            return None;
        }

        let preloader = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(preloader.config.update_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        preloader.maybe_analyze().await;
                        preloader.execute_preloading(&owner_id, &cancel).await;
                    }
                }
            }
            tracing::debug!("Preloader stopped");
        }))
    }

    async fn mark_served(&self, key: &str) {
        self.queue.write().await.retain(|queued| queued != key);
        if let Some(pattern) = self.patterns.write().await.get_mut(key) {
            pattern.confidence *= SERVED_DECAY;
        }
    }
}
