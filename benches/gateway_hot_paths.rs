//! Benchmarks for the per-request hot paths
//!
//! This benchmark measures:
//! - Local cache hits and inserts under batch eviction
//! - Sliding-window checks against the in-process store
//! - Fingerprint construction
//! - Breaker rejection latency while open

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_gateway_rust::cache::{CacheConfig, Fingerprint, ResponseCache};
use ai_gateway_rust::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use ai_gateway_rust::store::MemoryStore;
use ai_gateway_rust::Error;
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_cache(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    for size in [100usize, 1000] {
        let cache: ResponseCache = ResponseCache::new(CacheConfig::new().with_max_size(size));
        rt.block_on(async {
            for i in 0..size {
                cache.set(&format!("k{}", i), json!({"greeting": i}), None).await;
            }
        });
        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(cache.get("k7").await) });
        });

        let next = AtomicU64::new(0);
        group.bench_with_input(BenchmarkId::new("set_with_eviction", size), &size, |b, _| {
            b.to_async(&rt).iter(|| async {
                let i = next.fetch_add(1, Ordering::Relaxed);
                cache.set(&format!("new{}", i), json!({"greeting": i}), None).await;
            });
        });
    }
    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let rt = runtime();
    let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));

    group.bench_function("check_single_key", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                limiter
                    .check_limit("user:bench", 1_000_000, Duration::from_secs(1), "bench")
                    .await,
            )
        });
    });

    let next = AtomicU64::new(0);
    group.bench_function("check_many_keys", |b| {
        b.to_async(&rt).iter(|| async {
            let k = next.fetch_add(1, Ordering::Relaxed) % 1024;
            black_box(
                limiter
                    .check_limit(&format!("user:{}", k), 10, Duration::from_secs(60), "bench")
                    .await,
            )
        });
    });
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    c.bench_function("fingerprint_build", |b| {
        b.iter(|| {
            black_box(
                Fingerprint::builder("greeting")
                    .time_of_day(black_box(14))
                    .part("open_deals", black_box(12))
                    .rounded("pipeline_value", black_box(98_765.4321), 0)
                    .bucketed("tasks_due", black_box(23), 5)
                    .build(),
            )
        })
    });
}

fn bench_breaker_open(c: &mut Criterion) {
    let rt = runtime();
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_open_timeout(Duration::from_secs(3600)),
    );
    breaker.record_failure();

    c.bench_function("breaker_reject_while_open", |b| {
        b.to_async(&rt).iter(|| async {
            let r: Result<(), Error> = breaker.execute(|| async { Ok(()) }).await;
            black_box(r.is_err())
        });
    });
}

criterion_group!(
    benches,
    bench_cache,
    bench_rate_limiter,
    bench_fingerprint,
    bench_breaker_open
);
criterion_main!(benches);
