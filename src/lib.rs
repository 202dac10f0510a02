//! # 🏍️ motocache
//!
//! **Offline-First Caching and Sync for Mobile Clients**
//!
//! Client-side data layer for a motorcycle fuel and trip tracking app: a versioned,
//! expiring cache on top of the device key-value store, read analytics, predictive
//! preloading and a durable background sync queue for local mutations.
//!
//! ## ✨ Why motocache?
//!
//! Mobile clients live on flaky networks. **motocache** keeps the app usable offline and
//! cheap on the wire:
//!
//! - 📦 **Versioned entries**: bump the schema version and stale entries disappear on read
//! - 👤 **Per-user scoping**: logout clears one user's data and leaves shared data alone
//! - 🔮 **Predictive preloading**: keys read regularly are fetched before they are needed
//! - 🔁 **Durable sync**: writes queue locally, survive restarts and retry with backoff
//!
//! ## 🧠 Components
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | **Entry store** | [`CacheStore`] | Versioned, expiring entries with per-key locking |
//! | **Analytics** | [`AccessAnalytics`] | Hit rate, latency, score, alerts |
//! | **Preloader** | [`PredictivePreloader`] | Access patterns and prefetching |
//! | **Synchronizer** | [`BackgroundSync`] | Priority queue of pending remote writes |
//! | **Manager** | [`CacheManager`] | Builds and runs all of the above |
//!
//! ### 📦 Versioned Cache Entries
//! ```rust
//! use motocache::{CacheConfig, CacheStore, MemoryStore, SystemClock};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheStore::new(
//!     Arc::new(MemoryStore::new()),
//!     CacheConfig::default(), // 5 minute expiry, schema version 1
//!     Arc::new(SystemClock),
//! )?;
//!
//! cache.set("motors_u1", &vec!["Honda Beat"], Some("u1")).await;
//!
//! let motors: Option<Vec<String>> = cache.get("motors_u1").await;
//! assert_eq!(motors, Some(vec!["Honda Beat".to_string()]));
//!
//! // Logout: only u1's entries go away
//! cache.clear_owner_scope("u1").await;
//! # Ok(())
//! # }
//! ```
//!
//! ### 🔁 Background Sync
//! ```rust
//! use motocache::{
//!     BackgroundSync, CancellationToken, DataCategory, MemoryStore, RemoteBackend,
//!     RemoteError, SyncConfig, SyncPriority, SystemClock,
//! };
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Api;
//!
//! #[async_trait::async_trait]
//! impl RemoteBackend for Api {
//!     async fn fetch_collection(
//!         &self,
//!         _category: DataCategory,
//!         _owner_id: &str,
//!         _cancel: &CancellationToken,
//!     ) -> Result<Value, RemoteError> {
//!         Ok(json!([]))
//!     }
//!
//!     async fn upsert(
//!         &self,
//!         category: DataCategory,
//!         _owner_id: &str,
//!         key: &str,
//!         _payload: &Value,
//!         _cancel: &CancellationToken,
//!     ) -> Result<(), RemoteError> {
//!         println!("PUT {} ({})", category.endpoint(), key);
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sync = BackgroundSync::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(Api),
//!     SyncConfig::default(),
//!     Arc::new(SystemClock),
//! )?;
//!
//! sync.add_to_sync_queue("trips_u1", json!({"km": 12.5}), "u1", SyncPriority::High).await;
//!
//! let report = sync.sync_now(&CancellationToken::new()).await;
//! assert_eq!(report.succeeded, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## ✨ Core Features
//!
//! - 💾 **Pluggable storage**: [`MemoryStore`], [`FileStore`] and deflate [`CompressedStore`]
//! - 📊 **Analytics**: composite performance score, deduplicated alerts, recommendations
//! - 🔮 **Preloading**: confidence from recency, frequency and volume; single-flight passes
//! - ⏱️ **Backoff**: exponential retry delay with jitter, capped
//! - 🛑 **Cancellation**: one token stops every timer and in-flight request
//! - 📈 **Metrics**: optional `metrics` feature exports counters and gauges

pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod manager;
pub mod preload;
pub mod remote;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use analytics::{
    AccessAnalytics, AccessRecord, AlertKind, AnalyticsAlert, CacheAnalytics,
    OptimizationRecommendation, PerformanceSnapshot,
};
pub use cache::entry::{CacheEntry, Validity};
pub use cache::{CacheStats, CacheStore, KEY_PREFIX};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{AnalyticsConfig, CacheConfig, Config, PreloadConfig, SyncConfig};
pub use error::{CacheError, ConfigError, RemoteError};
pub use manager::CacheManager;
pub use preload::{PredictivePattern, PredictivePreloader, PreloadReport};
pub use remote::{DataCategory, RemoteBackend};
pub use store::compressed::{CompressedStore, Compression, DeflateCompression};
pub use store::file::FileStore;
pub use store::memory::MemoryStore;
pub use store::KeyValueStore;
pub use sync::{BackgroundSync, CycleReport, SyncItem, SyncPriority, SyncResult, SyncStats};
pub use tokio_util::sync::CancellationToken;
