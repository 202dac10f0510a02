use crate::clock::{duration_ms, SharedClock};
use crate::config::AnalyticsConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

/// Latency at or below which the latency component scores full marks
const TARGET_LATENCY_MS: f64 = 10.0;
/// Footprint at or below which the footprint component scores full marks
const TARGET_FOOTPRINT_BYTES: f64 = 10.0 * 1024.0 * 1024.0;

/// Read analytics for cache performance monitoring
#[derive(Debug)]
pub struct AccessAnalytics {
    config: AnalyticsConfig,
    clock: SharedClock,
    state: RwLock<AnalyticsState>,
}

#[derive(Debug, Default)]
struct AnalyticsState {
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    records: HashMap<String, AccessRecord>,
    /// Sum and count of every buffered latency sample across keys
    latency_sum_ms: f64,
    latency_count: usize,
    footprint_bytes: u64,
    expired_entries: usize,
    performance_score: f64,
    history: VecDeque<PerformanceSnapshot>,
    alerts: VecDeque<AnalyticsAlert>,
}

/// Per-key access history. Lives for the process only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub access_count: u64,
    pub hits: u64,
    pub misses: u64,
    /// Epoch milliseconds
    pub first_accessed_at: i64,
    /// Epoch milliseconds
    pub last_accessed_at: i64,
    pub latency_samples_ms: VecDeque<f64>,
}

impl AccessRecord {
    fn new(now: i64) -> Self {
        Self {
            access_count: 0,
            hits: 0,
            misses: 0,
            first_accessed_at: now,
            last_accessed_at: now,
            latency_samples_ms: VecDeque::new(),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.access_count)
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.latency_samples_ms.is_empty() {
            0.0
        } else {
            self.latency_samples_ms.iter().sum::<f64>() / self.latency_samples_ms.len() as f64
        }
    }
}

/// Point-in-time performance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: i64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub average_latency_ms: f64,
    pub footprint_bytes: u64,
    pub performance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    LowHitRate,
    HighLatency,
    LargeFootprint,
    ExpiredBacklog,
}

impl AlertKind {
    fn message(self) -> &'static str {
        match self {
            AlertKind::LowHitRate => "Cache hit rate is below threshold",
            AlertKind::HighLatency => "Average cache read latency is above threshold",
            AlertKind::LargeFootprint => "Cache footprint is above threshold",
            AlertKind::ExpiredBacklog => "Too many expired entries awaiting cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsAlert {
    pub kind: AlertKind,
    pub message: String,
    /// Observed value that tripped the threshold
    pub value: f64,
    /// Epoch milliseconds
    pub raised_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub category: String,
    pub priority: String, // "high", "medium", "low"
    pub description: String,
    pub expected_impact: String,
}

/// Full analytics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheAnalytics {
    pub generated_at: i64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub average_latency_ms: f64,
    pub footprint_bytes: u64,
    pub expired_entries: usize,
    pub performance_score: f64,
    pub tracked_keys: usize,
    pub most_accessed_keys: Vec<(String, u64)>,
    pub history: Vec<PerformanceSnapshot>,
    pub alerts: Vec<AnalyticsAlert>,
    pub recommendations: Vec<OptimizationRecommendation>,
}

impl AccessAnalytics {
    pub fn new(config: AnalyticsConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            state: RwLock::new(AnalyticsState::default()),
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Record one cache read
    pub async fn track_access(&self, key: &str, hit: bool, latency: Duration) {
        let now = self.clock.now_ms();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut state = self.state.write().await;

        state.total_requests += 1;
        if hit {
            state.cache_hits += 1;
        } else {
            state.cache_misses += 1;
        }

        let record = state
            .records
            .entry(key.to_string())
            .or_insert_with(|| AccessRecord::new(now));
        record.access_count += 1;
        record.last_accessed_at = now;
        if hit {
            record.hits += 1;
        } else {
            record.misses += 1;
        }
        record.latency_samples_ms.push_back(latency_ms);
        let evicted = if record.latency_samples_ms.len() > self.config.latency_samples {
            record.latency_samples_ms.pop_front()
        } else {
            None
        };

        state.latency_sum_ms += latency_ms;
        state.latency_count += 1;
        if let Some(old) = evicted {
            state.latency_sum_ms -= old;
            state.latency_count -= 1;
        }

        state.performance_score = performance_score(&state);

        if state.total_requests % self.config.snapshot_every == 0 {
            let snapshot = snapshot(&state, now);
            state.history.push_back(snapshot);
            while state.history.len() > self.config.history_size {
                state.history.pop_front();
            }
        }

        self.check_thresholds(&mut state, now);

        #[cfg(feature = "metrics")]
        {
            if hit {
                metrics::increment_counter!("motocache_hits");
            } else {
                metrics::increment_counter!("motocache_misses");
            }
            metrics::histogram!("motocache_read_latency_ms", latency_ms);
        }
    }

    /// Record the latest footprint measured by the entry store
    pub async fn update_footprint(&self, footprint_bytes: u64, expired_entries: usize) {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        state.footprint_bytes = footprint_bytes;
        state.expired_entries = expired_entries;
        state.performance_score = performance_score(&state);
        self.check_thresholds(&mut state, now);

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("motocache_footprint_bytes", footprint_bytes as f64);
            metrics::gauge!("motocache_expired_entries", expired_entries as f64);
        }
    }

    /// Keys ordered by access count, most accessed first
    pub async fn top_accessed_keys(&self, n: usize) -> Vec<(String, u64)> {
        let state = self.state.read().await;
        top_keys(&state, n)
    }

    /// Copy of every per-key record
    pub async fn access_records(&self) -> HashMap<String, AccessRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn hit_rate(&self) -> f64 {
        let state = self.state.read().await;
        ratio(state.cache_hits, state.total_requests)
    }

    pub async fn alerts(&self) -> Vec<AnalyticsAlert> {
        self.state.read().await.alerts.iter().cloned().collect()
    }

    /// Generate the full analytics snapshot
    pub async fn analytics(&self) -> CacheAnalytics {
        let state = self.state.read().await;
        let hit_rate = ratio(state.cache_hits, state.total_requests);
        let average_latency_ms = average_latency(&state);

        CacheAnalytics {
            generated_at: self.clock.now_ms(),
            total_requests: state.total_requests,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            hit_rate,
            average_latency_ms,
            footprint_bytes: state.footprint_bytes,
            expired_entries: state.expired_entries,
            performance_score: performance_score(&state),
            tracked_keys: state.records.len(),
            most_accessed_keys: top_keys(&state, 10),
            history: state.history.iter().cloned().collect(),
            alerts: state.alerts.iter().cloned().collect(),
            recommendations: self.generate_recommendations(&state),
        }
    }

    /// Forget everything recorded so far
    pub async fn reset(&self) {
        *self.state.write().await = AnalyticsState::default();
    }

    fn check_thresholds(&self, state: &mut AnalyticsState, now: i64) {
        let hit_rate = ratio(state.cache_hits, state.total_requests);
        let average_latency_ms = average_latency(state);
        let high_latency_ms = self.config.high_latency.as_secs_f64() * 1000.0;

        let mut tripped = Vec::new();
        if state.total_requests >= self.config.min_requests_for_alert
            && hit_rate < self.config.low_hit_rate
        {
            tripped.push((AlertKind::LowHitRate, hit_rate));
        }
        if average_latency_ms > high_latency_ms {
            tripped.push((AlertKind::HighLatency, average_latency_ms));
        }
        if state.footprint_bytes > self.config.max_footprint_bytes {
            tripped.push((AlertKind::LargeFootprint, state.footprint_bytes as f64));
        }
        if state.expired_entries > self.config.max_expired_entries {
            tripped.push((AlertKind::ExpiredBacklog, state.expired_entries as f64));
        }

        for (kind, value) in tripped {
            self.raise_alert(state, kind, value, now);
        }
    }

    fn raise_alert(&self, state: &mut AnalyticsState, kind: AlertKind, value: f64, now: i64) {
        let message = kind.message();
        let window = duration_ms(self.config.alert_dedup_window);
        let duplicate = state
            .alerts
            .iter()
            .any(|alert| alert.message == message && now - alert.raised_at < window);
        if duplicate {
            return;
        }

        tracing::warn!("{} ({:.2})", message, value);
        state.alerts.push_back(AnalyticsAlert {
            kind,
            message: message.to_string(),
            value,
            raised_at: now,
        });
        while state.alerts.len() > self.config.max_alerts {
            state.alerts.pop_front();
        }
    }

    fn generate_recommendations(&self, state: &AnalyticsState) -> Vec<OptimizationRecommendation> {
        let mut recommendations = Vec::new();
        let hit_rate = ratio(state.cache_hits, state.total_requests);

        // Hit rate recommendations
        if state.total_requests >= self.config.min_requests_for_alert && hit_rate < 0.5 {
            recommendations.push(OptimizationRecommendation {
                category: "Performance".to_string(),
                priority: "high".to_string(),
                description: "Hit rate is below 50%. Consider a longer expiry for slowly changing data or enabling predictive preloading.".to_string(),
                expected_impact: "Fewer network round trips on screen load".to_string(),
            });
        }

        // Response time recommendations
        if average_latency(state) > self.config.high_latency.as_secs_f64() * 500.0 {
            recommendations.push(OptimizationRecommendation {
                category: "Latency".to_string(),
                priority: "medium".to_string(),
                description: "Average read latency is high. Consider compressing large payloads or splitting large collections.".to_string(),
                expected_impact: "Faster cache reads".to_string(),
            });
        }

        // Footprint recommendations
        if state.footprint_bytes as f64 > self.config.max_footprint_bytes as f64 * 0.8 {
            recommendations.push(OptimizationRecommendation {
                category: "Storage".to_string(),
                priority: "medium".to_string(),
                description: "Cache footprint is approaching its limit. Run cleanup more often or shorten the expiry.".to_string(),
                expected_impact: "Lower device storage usage".to_string(),
            });
        }

        if state.expired_entries > self.config.max_expired_entries / 2 {
            recommendations.push(OptimizationRecommendation {
                category: "Maintenance".to_string(),
                priority: "low".to_string(),
                description: "Many expired entries are waiting for cleanup. Run cleanup when the app resumes.".to_string(),
                expected_impact: "Reclaimed storage and faster key scans".to_string(),
            });
        }

        recommendations
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64
    } else {
        0.0
    }
}

fn average_latency(state: &AnalyticsState) -> f64 {
    if state.latency_count > 0 {
        (state.latency_sum_ms / state.latency_count as f64).max(0.0)
    } else {
        0.0
    }
}

/// 40% hit rate, 30% latency, 20% footprint, 10% for having any traffic.
fn performance_score(state: &AnalyticsState) -> f64 {
    let hit_rate = ratio(state.cache_hits, state.total_requests);

    let average_latency_ms = average_latency(state);
    let latency_score = if average_latency_ms <= TARGET_LATENCY_MS {
        1.0
    } else {
        TARGET_LATENCY_MS / average_latency_ms
    };

    let footprint_score = if state.footprint_bytes as f64 <= TARGET_FOOTPRINT_BYTES {
        1.0
    } else {
        TARGET_FOOTPRINT_BYTES / state.footprint_bytes as f64
    };

    let traffic_bonus = if state.total_requests > 0 { 1.0 } else { 0.0 };

    let score = 40.0 * hit_rate + 30.0 * latency_score + 20.0 * footprint_score + 10.0 * traffic_bonus;
    score.clamp(0.0, 100.0)
}

fn snapshot(state: &AnalyticsState, now: i64) -> PerformanceSnapshot {
    PerformanceSnapshot {
        timestamp: now,
        total_requests: state.total_requests,
        hit_rate: ratio(state.cache_hits, state.total_requests),
        average_latency_ms: average_latency(state),
        footprint_bytes: state.footprint_bytes,
        performance_score: state.performance_score,
    }
}

fn top_keys(state: &AnalyticsState, n: usize) -> Vec<(String, u64)> {
    let mut most_accessed: Vec<(String, u64)> = state
        .records
        .iter()
        .map(|(key, record)| (key.clone(), record.access_count))
        .collect();
    most_accessed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    most_accessed.truncate(n);
    most_accessed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(hits: u64, misses: u64, latency_ms: f64, footprint: u64) -> AnalyticsState {
        AnalyticsState {
            total_requests: hits + misses,
            cache_hits: hits,
            cache_misses: misses,
            latency_sum_ms: latency_ms * (hits + misses) as f64,
            latency_count: (hits + misses) as usize,
            footprint_bytes: footprint,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_state_scores_only_latency_and_footprint() {
        let state = AnalyticsState::default();
        assert_eq!(performance_score(&state), 50.0);
    }

    #[test]
    fn test_perfect_cache_scores_100() {
        let state = state_with(10, 0, 1.0, 1024);
        assert_eq!(performance_score(&state), 100.0);
    }

    #[test]
    fn test_slow_reads_lower_the_score() {
        let fast = state_with(5, 5, 5.0, 0);
        let slow = state_with(5, 5, 200.0, 0);
        assert!(performance_score(&slow) < performance_score(&fast));
        assert_eq!(performance_score(&fast), 80.0);
        assert!((performance_score(&slow) - 51.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_stays_within_bounds() {
        let state = state_with(0, 1000, 10_000.0, u64::MAX / 2);
        let score = performance_score(&state);
        assert!((0.0..=100.0).contains(&score));
    }
}
