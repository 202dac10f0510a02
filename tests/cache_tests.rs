mod common;

use bytes::Bytes;
use common::{manual_clock, FlakyStore};
use motocache::{
    AccessAnalytics, AnalyticsConfig, CacheConfig, CacheError, CacheStore, CompressedStore,
    FileStore, KeyValueStore, MemoryStore, KEY_PREFIX,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Motor {
    id: String,
    name: String,
}

fn motors() -> Vec<Motor> {
    vec![
        Motor {
            id: "m1".to_string(),
            name: "Honda Beat".to_string(),
        },
        Motor {
            id: "m2".to_string(),
            name: "Yamaha NMAX".to_string(),
        },
    ]
}

#[tokio::test]
async fn test_set_get_then_expire() {
    let (clock, shared) = manual_clock();
    let store = Arc::new(MemoryStore::new());
    let analytics = Arc::new(AccessAnalytics::new(AnalyticsConfig::default(), shared.clone()).unwrap());
    let cache = CacheStore::new(Arc::clone(&store), CacheConfig::default(), shared)
        .unwrap()
        .with_analytics(Arc::clone(&analytics));

    cache.set("motors_u1", &motors(), Some("u1")).await;

    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert_eq!(cached, Some(motors()));
    let report = analytics.analytics().await;
    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.cache_misses, 0);

    // Default expiry is 5 minutes
    clock.advance(Duration::from_secs(6 * 60));

    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert_eq!(cached, None);
    let report = analytics.analytics().await;
    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.cache_misses, 1);

    // Expired entry was deleted by the read
    assert!(!store.contains_key("@motocache:motors_u1").await);
}

#[tokio::test]
async fn test_entry_valid_until_expiry_boundary() {
    let (clock, shared) = manual_clock();
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap();

    cache
        .set_with_expiry("reports", &vec![1, 2, 3], None, Duration::from_secs(60))
        .await;

    clock.advance(Duration::from_millis(59_999));
    assert!(cache.is_valid("reports").await);

    clock.advance(Duration::from_millis(1));
    assert!(!cache.is_valid("reports").await);
}

#[tokio::test]
async fn test_version_mismatch_is_a_miss_and_deletes() {
    let (_clock, shared) = manual_clock();
    let store = Arc::new(MemoryStore::new());

    let v1 = CacheStore::new(Arc::clone(&store), CacheConfig::default(), shared.clone()).unwrap();
    v1.set("motors_u1", &motors(), Some("u1")).await;
    assert!(store.contains_key("@motocache:motors_u1").await);

    let v2 = CacheStore::new(
        Arc::clone(&store),
        CacheConfig {
            version: 2,
            ..Default::default()
        },
        shared,
    )
    .unwrap();

    let cached: Option<Vec<Motor>> = v2.get("motors_u1").await;
    assert!(cached.is_none());
    assert!(!store.contains_key("@motocache:motors_u1").await);
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    let (_clock, shared) = manual_clock();
    let store = Arc::new(MemoryStore::new());
    store
        .set_item("@motocache:trips_u1", Bytes::from("not json"))
        .await
        .unwrap();

    let cache = CacheStore::new(Arc::clone(&store), CacheConfig::default(), shared).unwrap();
    let cached: Option<Vec<Motor>> = cache.get("trips_u1").await;
    assert!(cached.is_none());
    assert!(!store.contains_key("@motocache:trips_u1").await);
}

#[tokio::test]
async fn test_cleanup_expired_is_idempotent() {
    let (clock, shared) = manual_clock();
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap();

    cache
        .set_with_expiry("trips_u1", &"short", Some("u1"), Duration::from_secs(30))
        .await;
    cache
        .set_with_expiry("reports_u1", &"short", Some("u1"), Duration::from_secs(30))
        .await;
    cache.set("motors_u1", &motors(), Some("u1")).await;

    clock.advance(Duration::from_secs(60));

    assert_eq!(cache.cleanup_expired().await, 2);
    assert_eq!(cache.cleanup_expired().await, 0);

    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert_eq!(cached, Some(motors()));
}

#[tokio::test]
async fn test_clear_owner_scope_keeps_other_owners_and_global_data() {
    let (_clock, shared) = manual_clock();
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap();

    cache.set("motors_u1", &motors(), Some("u1")).await;
    cache.set("trips_u1", &vec!["t1"], Some("u1")).await;
    cache.set("motors_u2", &motors(), Some("u2")).await;
    cache.set("gasStations", &vec!["s1", "s2"], None).await;
    assert!(cache.last_write("u1").await.is_some());

    assert_eq!(cache.clear_owner_scope("u1").await, 2);

    assert!(!cache.is_valid("motors_u1").await);
    assert!(!cache.is_valid("trips_u1").await);
    assert!(cache.is_valid("motors_u2").await);
    assert!(cache.is_valid("gasStations").await);
    assert!(cache.last_write("u1").await.is_none());
}

#[tokio::test]
async fn test_clear_all_leaves_foreign_keys() {
    let (_clock, shared) = manual_clock();
    let store = Arc::new(MemoryStore::new());
    store
        .set_item("auth_token", Bytes::from("secret"))
        .await
        .unwrap();

    let cache = CacheStore::new(Arc::clone(&store), CacheConfig::default(), shared).unwrap();
    cache.set("motors_u1", &motors(), Some("u1")).await;
    cache.set("gasStations", &vec!["s1"], None).await;

    assert_eq!(cache.clear_all().await, 2);
    assert!(cache.managed_keys().await.is_empty());
    assert_eq!(store.len().await, 1);
    assert!(store.contains_key("auth_token").await);
}

#[tokio::test]
async fn test_storage_failures_read_as_misses() {
    let (_clock, shared) = manual_clock();
    let store = Arc::new(FlakyStore::new());
    let cache = CacheStore::new(Arc::clone(&store), CacheConfig::default(), shared).unwrap();

    cache.set("motors_u1", &motors(), Some("u1")).await;
    store.set_failing(true);

    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert!(cached.is_none());
    assert_eq!(cache.cleanup_expired().await, 0);

    // `set` swallows the failure, `try_set` reports it
    cache.set("trips_u1", &vec!["t1"], Some("u1")).await;
    let result = cache
        .try_set("trips_u1", &vec!["t1"], Some("u1"), Duration::from_secs(60))
        .await;
    assert!(matches!(result, Err(CacheError::Storage(_))));

    store.set_failing(false);
    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert_eq!(cached, Some(motors()));
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let (_clock, shared) = manual_clock();
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap();

    let result = cache.try_set("", &1, None, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(CacheError::InvalidKey(_))));
}

#[tokio::test]
async fn test_stats_count_bytes_and_expired_entries() {
    let (clock, shared) = manual_clock();
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap();

    let written = cache
        .try_set("motors_u1", &motors(), Some("u1"), Duration::from_secs(600))
        .await
        .unwrap();
    cache
        .set_with_expiry("reports", &"old", None, Duration::from_secs(10))
        .await;
    clock.advance(Duration::from_secs(20));

    let stats = cache.stats().await;
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.expired_count, 1);
    assert!(stats.size_bytes > written as u64);
}

#[tokio::test]
async fn test_enforce_size_limit_evicts_oldest_first() {
    let (clock, shared) = manual_clock();
    let config = CacheConfig {
        max_size_bytes: 1000,
        cleanup_threshold: 0.5,
        ..Default::default()
    };
    let cache = CacheStore::new(Arc::new(MemoryStore::new()), config, shared).unwrap();

    let payload = "x".repeat(50);
    for i in 0..10 {
        cache.set(&format!("reports_{}", i), &payload, None).await;
        clock.advance(Duration::from_secs(1));
    }
    assert!(cache.stats().await.size_bytes > 500);

    let evicted = cache.enforce_size_limit().await;

    assert!(evicted > 0);
    assert!(cache.stats().await.size_bytes <= 500);
    assert!(!cache.is_valid("reports_0").await);
    assert!(cache.is_valid("reports_9").await);

    // Already under the watermark
    assert_eq!(cache.enforce_size_limit().await, 0);
}

#[tokio::test]
async fn test_with_lock_serializes_same_key() {
    let (_clock, shared) = manual_clock();
    let cache = Arc::new(
        CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default(), shared).unwrap(),
    );
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = Arc::clone(&cache);
        let in_flight = Arc::clone(&in_flight);
        let overlapped = Arc::clone(&overlapped);
        handles.push(tokio::spawn(async move {
            cache
                .with_lock("trips_u1", || async {
                    if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let (_clock, shared) = manual_clock();

    {
        let store = Arc::new(FileStore::new(temp_dir.path().to_path_buf()).unwrap());
        let cache = CacheStore::new(store, CacheConfig::default(), shared.clone()).unwrap();
        cache.set("motors_u1", &motors(), Some("u1")).await;
        cache.set("destinations_u1", &vec!["Bandung"], Some("u1")).await;
    }

    let store = Arc::new(FileStore::new(temp_dir.path().to_path_buf()).unwrap());
    let mut keys = store.get_all_keys().await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            format!("{}destinations_u1", KEY_PREFIX),
            format!("{}motors_u1", KEY_PREFIX)
        ]
    );

    let cache = CacheStore::new(store, CacheConfig::default(), shared).unwrap();
    let cached: Option<Vec<Motor>> = cache.get("motors_u1").await;
    assert_eq!(cached, Some(motors()));

    cache.remove("motors_u1").await;
    assert!(!cache.is_valid("motors_u1").await);
}

#[tokio::test]
async fn test_compressed_store_round_trips_large_entries() {
    let (_clock, shared) = manual_clock();
    let raw = MemoryStore::new();
    let store = Arc::new(CompressedStore::new(raw.clone()));
    let cache = CacheStore::new(store, CacheConfig::default(), shared).unwrap();

    let logs: Vec<String> = (0..200).map(|i| format!("fuel log entry {}", i % 4)).collect();
    cache.set("fuelLogs_u1", &logs, Some("u1")).await;
    cache.set("motors_u1", &"tiny", Some("u1")).await;

    let cached: Option<Vec<String>> = cache.get("fuelLogs_u1").await;
    assert_eq!(cached, Some(logs.clone()));

    let stored = raw
        .get_item("@motocache:fuelLogs_u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored[0], b'D');
    assert!(stored.len() < serde_json::to_vec(&logs).unwrap().len());

    let small = raw.get_item("@motocache:motors_u1").await.unwrap().unwrap();
    assert_eq!(small[0], b'R');

    // Scans see through the compression
    assert_eq!(cache.stats().await.entry_count, 2);
}

#[tokio::test]
async fn test_corrupt_compressed_entries_are_deleted() {
    let (_clock, shared) = manual_clock();
    let raw = MemoryStore::new();
    let cache = CacheStore::new(
        Arc::new(CompressedStore::new(raw.clone())),
        CacheConfig::default(),
        shared,
    )
    .unwrap();

    // Compressed tag and length, but the deflate body is garbage
    let garbage = Bytes::from_static(b"D\x00\x00\x01\x00\xff\xff\xff");
    raw.set_item("@motocache:trips_u1", garbage.clone()).await.unwrap();
    raw.set_item("@motocache:motors_u1", garbage).await.unwrap();
    // Not tagged at all
    raw.set_item("@motocache:reports", Bytes::from_static(b"{}"))
        .await
        .unwrap();

    let stats = cache.stats().await;
    assert_eq!(stats.entry_count, 3);
    assert_eq!(stats.expired_count, 3);

    let cached: Option<Vec<String>> = cache.get("trips_u1").await;
    assert_eq!(cached, None);
    assert_eq!(raw.get_item("@motocache:trips_u1").await.unwrap(), None);

    assert_eq!(cache.cleanup_expired().await, 2);
    assert!(raw.get_all_keys().await.unwrap().is_empty());
}
