//! Response cache get/put throughput under the mixed eviction strategy.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use toolmesh_engine::config::CacheConfig;
use toolmesh_engine::prelude::ResponseCache;

fn bench_put(c: &mut Criterion) {
    c.bench_function("cache_put_under_capacity", |b| {
        let cache = ResponseCache::new(CacheConfig::default());
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key-{i}");
            cache.put(key, json!({"value": i}), None);
            i += 1;
        });
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let cache = ResponseCache::new(CacheConfig::default());
    cache.put("steady-key".to_string(), json!({"value": 1}), None);
    c.bench_function("cache_get_hit", |b| {
        b.iter(|| black_box(cache.get("steady-key")));
    });
}

fn bench_put_at_capacity(c: &mut Criterion) {
    c.bench_function("cache_put_forces_eviction", |b| {
        let mut config = CacheConfig::default();
        config.max_size = 100;
        let cache = ResponseCache::new(config);
        for i in 0..100 {
            cache.put(format!("warm-{i}"), json!(i), None);
        }
        let mut i = 0u64;
        b.iter(|| {
            cache.put(format!("evict-{i}"), json!(i), None);
            i += 1;
        });
    });
}

criterion_group!(benches, bench_put, bench_get_hit, bench_put_at_capacity);
criterion_main!(benches);
