use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use motocache::{
    AccessAnalytics, AnalyticsConfig, CacheConfig, CacheStore, CompressedStore, FileStore,
    MemoryStore, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn payload(items: usize) -> Vec<String> {
    (0..items)
        .map(|i| format!("fuel log {} - 4.2 liters at km {}", i, i * 37))
        .collect()
}

fn memory_store_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("memory_store");

    // Test different payload sizes
    for items in [10, 100, 1000].iter() {
        let data = payload(*items);
        group.throughput(Throughput::Elements(*items as u64));
        group.bench_with_input(BenchmarkId::new("set_get", items), &data, |b, data| {
            let cache = CacheStore::new(
                Arc::new(MemoryStore::new()),
                CacheConfig::default(),
                Arc::new(SystemClock),
            )
            .unwrap();
            b.iter(|| {
                rt.block_on(async {
                    cache.set("fuelLogs_u1", data, Some("u1")).await;
                    let result: Option<Vec<String>> = cache.get("fuelLogs_u1").await;
                    black_box(result);
                })
            })
        });
    }

    group.finish();
}

fn file_store_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("file_store");
    group.sample_size(50); // Reduce sample size for slower disk operations

    let temp_dir = TempDir::new().unwrap();
    let cache = CacheStore::new(
        Arc::new(FileStore::new(temp_dir.path().to_path_buf()).unwrap()),
        CacheConfig::default(),
        Arc::new(SystemClock),
    )
    .unwrap();
    let data = payload(100);

    group.bench_function("set_get_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                cache.set("fuelLogs_u1", &data, Some("u1")).await;
                let result: Option<Vec<String>> = cache.get("fuelLogs_u1").await;
                black_box(result);
            })
        })
    });

    group.finish();
}

fn compression_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("compressed_store");

    for items in [100, 1000].iter() {
        let data = payload(*items);
        group.bench_with_input(BenchmarkId::new("set_get", items), &data, |b, data| {
            let cache = CacheStore::new(
                Arc::new(CompressedStore::new(MemoryStore::new())),
                CacheConfig::default(),
                Arc::new(SystemClock),
            )
            .unwrap();
            b.iter(|| {
                rt.block_on(async {
                    cache.set("fuelLogs_u1", data, Some("u1")).await;
                    let result: Option<Vec<String>> = cache.get("fuelLogs_u1").await;
                    black_box(result);
                })
            })
        });
    }

    group.finish();
}

fn analytics_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("analytics");

    let analytics =
        AccessAnalytics::new(AnalyticsConfig::default(), Arc::new(SystemClock)).unwrap();
    let keys: Vec<String> = (0..50).map(|i| format!("trips_u{}", i)).collect();

    group.bench_function("track_access", |b| {
        let mut i = 0;
        b.iter(|| {
            rt.block_on(async {
                let key = &keys[i % keys.len()];
                analytics
                    .track_access(key, i % 3 != 0, Duration::from_micros(250))
                    .await;
                i += 1;
            })
        })
    });

    group.bench_function("full_snapshot", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(analytics.analytics().await);
            })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    memory_store_benchmarks,
    file_store_benchmarks,
    compression_benchmarks,
    analytics_benchmarks
);
criterion_main!(benches);
