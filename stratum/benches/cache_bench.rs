//! Tiered cache benchmarks
//!
//! Local hits, promotion from the backend, writes through both tiers and the
//! value codec with compression and encryption enabled.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use stratum::{
    CacheConfig, CacheValue, CompressionConfig, EncryptionConfig, MemoryBackend, TieredCache,
    ValueCodec,
};

fn cache() -> TieredCache {
    let mut config = CacheConfig::default();
    config.tuner.enabled = false;
    TieredCache::new(config, Arc::new(MemoryBackend::new())).unwrap()
}

fn bench_local_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = cache();

    // Pre-populate
    rt.block_on(async {
        cache.set_default("hot", "bench", "value").await.unwrap();
    });

    c.bench_function("get_local_hit", |b| {
        b.to_async(&rt).iter(|| async {
            cache.get(black_box("hot"), "bench").await.unwrap();
        });
    });
}

fn bench_promotion(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("get_promote_from_backend", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let cache = cache();
                rt.block_on(async {
                    cache.set_default("cold", "bench", "value").await.unwrap();
                });
                cache.entry_store().clear();
                cache
            },
            |cache| async move {
                cache.get(black_box("cold"), "bench").await.unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_set(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = cache();

    c.bench_function("set_both_tiers", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .set_default(black_box("key"), "bench", "value")
                .await
                .unwrap();
        });
    });
}

fn bench_codec(c: &mut Criterion) {
    let plain = ValueCodec::passthrough();
    let sealed = ValueCodec::new(
        CompressionConfig::default(),
        EncryptionConfig {
            enabled: true,
            passphrase: "bench".to_string(),
            pbkdf2_iterations: 1_000,
            ..Default::default()
        },
    )
    .unwrap();

    let mut group = c.benchmark_group("codec_roundtrip");
    for size in [256usize, 4 * 1024, 64 * 1024] {
        let text = "INFO: session refreshed for user 42\n";
        let value = CacheValue::String(text.repeat(size / text.len() + 1));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("plain", size), &value, |b, value| {
            b.iter(|| plain.decode(&plain.encode(black_box(value)).unwrap()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("sealed", size), &value, |b, value| {
            b.iter(|| sealed.decode(&sealed.encode(black_box(value)).unwrap()).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_local_get,
    bench_promotion,
    bench_set,
    bench_codec
);
criterion_main!(benches);
