use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the versioned entry store
///
/// # Default Values
/// - `version`: 1
/// - `expiry`: 5 minutes
/// - `max_size_bytes`: 50MB
/// - `cleanup_threshold`: 0.8 of `max_size_bytes`
/// - `cleanup_interval`: 10 minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Schema version stamped on every entry; entries with another version are discarded
    pub version: u32,

    /// Default time-to-live for cached entries
    pub expiry: Duration,

    /// Maximum total size of managed entries in bytes
    pub max_size_bytes: u64,

    /// Fraction of `max_size_bytes` above which eviction starts
    pub cleanup_threshold: f64,

    /// How often the background maintenance pass runs
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: 1,
            expiry: Duration::from_secs(5 * 60),
            max_size_bytes: 50 * 1024 * 1024, // 50MB
            cleanup_threshold: 0.8,
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("cache.expiry", self.expiry)?;
        non_zero("cache.cleanup_interval", self.cleanup_interval)?;
        if self.max_size_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "cache.max_size_bytes",
            });
        }
        fraction("cache.cleanup_threshold", self.cleanup_threshold, false)
    }

    /// Footprint above which `enforce_size_limit` evicts.
    pub fn cleanup_watermark(&self) -> u64 {
        (self.max_size_bytes as f64 * self.cleanup_threshold) as u64
    }
}

/// Configuration for the background synchronizer
///
/// # Default Values
/// - `sync_interval`: 5 minutes
/// - `batch_size`: 10 items
/// - `retry_attempts`: 3
/// - `retry_delay`: 2 seconds (doubled per attempt, capped at `max_retry_delay`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,

    /// Time between scheduled sync cycles
    pub sync_interval: Duration,

    /// Items attempted concurrently within one batch
    pub batch_size: usize,

    /// Retries after the first failed attempt before an item is dropped
    pub retry_attempts: u32,

    /// Base delay for exponential backoff
    pub retry_delay: Duration,

    /// Upper bound for a single backoff delay
    pub max_retry_delay: Duration,

    /// Relative jitter applied to each backoff delay, in [0, 1]
    pub retry_jitter: f64,

    /// Deadline for a single remote write
    pub request_timeout: Duration,

    /// Pause between consecutive batches of one cycle
    pub batch_delay: Duration,

    /// Data categories (e.g. "trips") always synced with high priority
    pub priority_keys: Vec<String>,

    /// Keep queueing but never contact the backend
    pub offline_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: Duration::from_secs(5 * 60),
            batch_size: 10,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(5 * 60),
            retry_jitter: 0.2,
            request_timeout: Duration::from_secs(30),
            batch_delay: Duration::from_millis(100),
            priority_keys: Vec::new(),
            offline_mode: false,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("sync.sync_interval", self.sync_interval)?;
        non_zero("sync.request_timeout", self.request_timeout)?;
        if self.batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "sync.batch_size",
            });
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ConfigError::OutOfRange {
                field: "sync.max_retry_delay",
                min: self.retry_delay.as_secs_f64(),
                max: f64::INFINITY,
                value: self.max_retry_delay.as_secs_f64(),
            });
        }
        fraction("sync.retry_jitter", self.retry_jitter, true)
    }
}

/// Configuration for predictive preloading
///
/// # Default Values
/// - `confidence_threshold`: 0.7
/// - `max_preload_size_bytes`: 5MB per pass
/// - `analysis_window`: 24 hours
/// - `update_interval`: 30 minutes
/// - `lookahead`: 30 minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadConfig {
    pub enabled: bool,

    /// Minimum confidence for a key to be preloaded
    pub confidence_threshold: f64,

    /// Payload budget for a single preloading pass
    pub max_preload_size_bytes: u64,

    /// Only keys accessed within this window are analyzed
    pub analysis_window: Duration,

    /// Minimum time between two analysis passes
    pub update_interval: Duration,

    /// Keys predicted to be needed within this horizon are queued
    pub lookahead: Duration,

    /// Deadline for a single remote fetch
    pub request_timeout: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            max_preload_size_bytes: 5 * 1024 * 1024, // 5MB
            analysis_window: Duration::from_secs(24 * 60 * 60),
            update_interval: Duration::from_secs(30 * 60),
            lookahead: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl PreloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fraction(
            "preload.confidence_threshold",
            self.confidence_threshold,
            true,
        )?;
        non_zero("preload.analysis_window", self.analysis_window)?;
        non_zero("preload.update_interval", self.update_interval)?;
        non_zero("preload.request_timeout", self.request_timeout)
    }
}

/// Thresholds for access analytics
///
/// # Default Values
/// - `latency_samples`: 100 per key
/// - `snapshot_every`: every 10th access
/// - `low_hit_rate`: 0.3 after `min_requests_for_alert` (10) requests
/// - `high_latency`: 100ms
/// - `max_footprint_bytes`: 50MB
/// - `max_expired_entries`: 50
/// - `alert_dedup_window`: 60 seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub latency_samples: usize,
    pub history_size: usize,
    pub snapshot_every: u64,
    pub max_alerts: usize,
    pub min_requests_for_alert: u64,
    pub low_hit_rate: f64,
    pub high_latency: Duration,
    pub max_footprint_bytes: u64,
    pub max_expired_entries: usize,
    pub alert_dedup_window: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            latency_samples: 100,
            history_size: 100,
            snapshot_every: 10,
            max_alerts: 50,
            min_requests_for_alert: 10,
            low_hit_rate: 0.3,
            high_latency: Duration::from_millis(100),
            max_footprint_bytes: 50 * 1024 * 1024,
            max_expired_entries: 50,
            alert_dedup_window: Duration::from_secs(60),
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.latency_samples == 0 {
            return Err(ConfigError::Zero {
                field: "analytics.latency_samples",
            });
        }
        if self.snapshot_every == 0 {
            return Err(ConfigError::Zero {
                field: "analytics.snapshot_every",
            });
        }
        fraction("analytics.low_hit_rate", self.low_hit_rate, true)
    }
}

/// Everything [`crate::CacheManager`] needs, validated as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub preload: PreloadConfig,
    pub analytics: AnalyticsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.sync.validate()?;
        self.preload.validate()?;
        self.analytics.validate()
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}

fn fraction(field: &'static str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = if allow_zero {
        (0.0..=1.0).contains(&value)
    } else {
        value > 0.0 && value <= 1.0
    };
    if in_range {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min: 0.0,
            max: 1.0,
            value,
        })
    }
}
