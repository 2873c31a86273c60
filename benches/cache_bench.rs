//! Benchmarks for the query cache and live buffers
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use enginewatch::config::{CacheConfig, LiveDataConfig};
use enginewatch::{LiveDataStore, MetricReading, PerformanceMonitor, Query, QueryCache, QueryResult, RingBuffer};

fn readings(count: usize) -> Vec<MetricReading> {
    (0..count)
        .map(|i| MetricReading::new("ME-1", "rpm", 600.0 + i as f64, i as i64 * 1000))
        .collect()
}

fn result_for(query: &Query, points: usize) -> QueryResult {
    QueryResult {
        query: query.clone(),
        data_points: readings(points),
        total: points as u64,
        page: 1,
        page_size: 1000,
        total_pages: 1,
        execution_time_ms: 0,
        cached: false,
    }
}

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    for capacity in [1000, 5000] {
        let batch = readings(100);
        group.throughput(Throughput::Elements(batch.len() as u64));

        group.bench_function(format!("extend_full_{}", capacity), |b| {
            let mut ring = RingBuffer::new(capacity);
            ring.extend(readings(capacity));

            b.iter(|| ring.extend(black_box(batch.iter().cloned())))
        });
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("get_hit", |b| {
        let cache = QueryCache::new(CacheConfig::default(), PerformanceMonitor::new());
        let query = Query::new("ME-1", 0, 3_600_000).unwrap().metric("rpm");
        rt.block_on(cache.set(&query, result_for(&query, 500)));

        b.iter(|| rt.block_on(cache.get(black_box(&query))))
    });

    group.bench_function("set_at_capacity", |b| {
        let config = CacheConfig {
            max_cache_size: 100,
            ..CacheConfig::default()
        };
        let cache = QueryCache::new(config, PerformanceMonitor::new());
        let queries: Vec<Query> = (0..200)
            .map(|i| Query::new("ME-1", i, i + 60_000).unwrap().metric("rpm"))
            .collect();
        let results: Vec<QueryResult> = queries.iter().map(|q| result_for(q, 10)).collect();

        let mut n = 0usize;
        b.iter(|| {
            let i = n % queries.len();
            n += 1;
            rt.block_on(cache.set(&queries[i], results[i].clone()))
        })
    });

    group.bench_function("signature", |b| {
        let query = Query::new("ME-1", 0, 3_600_000)
            .unwrap()
            .metrics(["rpm", "exhaust_temp", "fuel_rate", "lube_oil_pressure"]);
        b.iter(|| black_box(&query).signature())
    });

    group.finish();
}

fn bench_live_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_store");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.throughput(Throughput::Elements(100));
    group.bench_function("ingest_100", |b| {
        let store = LiveDataStore::new(LiveDataConfig::default());
        let batch = readings(100);

        b.iter(|| rt.block_on(store.ingest("ME-1", black_box(batch.clone()))))
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer, bench_cache, bench_live_store);
criterion_main!(benches);
