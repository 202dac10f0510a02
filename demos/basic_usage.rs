use motocache::{
    CacheManager, CancellationToken, CompressedStore, Config, DataCategory, FileStore,
    RemoteBackend, RemoteError, SyncPriority,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Serialize, Deserialize)]
struct FuelLog {
    liters: f64,
    odometer_km: u32,
}

/// Pretend API: the first write hits a busy server
#[derive(Default)]
struct DemoApi {
    writes: AtomicUsize,
}

#[async_trait::async_trait]
impl RemoteBackend for DemoApi {
    async fn fetch_collection(
        &self,
        category: DataCategory,
        owner_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Value, RemoteError> {
        println!("GET {}?owner={}", category.endpoint(), owner_id);
        Ok(json!([]))
    }

    async fn upsert(
        &self,
        category: DataCategory,
        _owner_id: &str,
        key: &str,
        _payload: &Value,
        _cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
            println!("PUT {} ({}) -> 503", category.endpoint(), key);
            return Err(RemoteError::from_status(503, "busy"));
        }
        println!("PUT {} ({}) -> 200", category.endpoint(), key);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = std::env::temp_dir().join("motocache-demo");
    let store = CompressedStore::new(FileStore::new(dir.clone())?);

    let mut config = Config::default();
    config.sync.retry_delay = std::time::Duration::ZERO;
    let manager = CacheManager::new(store, DemoApi::default(), config)?;
    manager.start("u1").await;

    // Write locally, sync later
    let logs = vec![FuelLog {
        liters: 4.2,
        odometer_km: 12_840,
    }];
    manager
        .write_through("fuelLogs_u1", &logs, "u1", SyncPriority::High)
        .await;
    println!("Cached fuel logs in {}", dir.display());

    let cached: Option<Vec<FuelLog>> = manager.get("fuelLogs_u1").await;
    println!("Read back: {:?}", cached);

    // First attempt fails with 503, second goes through
    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let report = manager.sync().sync_now(&cancel).await;
        println!("Sync cycle: {:?}", report);
    }

    println!("Sync stats: {:?}", manager.sync().stats().await);
    println!("Cache stats: {:?}", manager.on_resume().await);

    let analytics = manager.analytics().analytics().await;
    println!(
        "Hit rate: {:.1}%, score {:.1}",
        analytics.hit_rate * 100.0,
        analytics.performance_score
    );

    let cleared = manager.logout().await;
    println!("Logged out, {} entries cleared", cleared);

    Ok(())
}
