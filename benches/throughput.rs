//! Throughput Benchmark for timedkv
//!
//! Measures the record codec, a single shard, and requests routed across the
//! shard ring.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use timedkv::codec::{RecordDecoder, RecordEncoder};
use timedkv::config::{RouterConfig, StoreConfig};
use timedkv::storage::{Entry, LogRecord, Ttl, TtlShard};
use timedkv::Router;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

fn memory_config() -> StoreConfig {
    StoreConfig {
        persist: false,
        ..Default::default()
    }
}

fn records(count: usize) -> Vec<LogRecord> {
    (0..count)
        .map(|i| LogRecord::new(format!("key:{}", i), Entry::new(format!("value:{}", i), 0)))
        .collect()
}

/// Benchmark encoding and decoding of log records
fn bench_codec(c: &mut Criterion) {
    let input = records(10_000);

    let mut encoded = Vec::new();
    let mut encoder = RecordEncoder::new(&mut encoded);
    for record in &input {
        encoder.encode(record).unwrap();
    }
    drop(encoder);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(input.len() as u64));

    group.bench_function("encode_10k", |b| {
        b.iter(|| {
            let mut encoder = RecordEncoder::new(Vec::with_capacity(encoded.len()));
            for record in &input {
                encoder.encode(record).unwrap();
            }
            black_box(encoder.into_inner());
        });
    });

    group.bench_function("decode_10k", |b| {
        b.iter(|| {
            let mut decoder = RecordDecoder::new(Cursor::new(&encoded))
                .with_min_record_len(LogRecord::MIN_ENCODED_LEN);
            let count = decoder.decode(|record: LogRecord| {
                black_box(record);
            });
            black_box(count.unwrap());
        });
    });

    group.finish();
}

/// Benchmark direct shard access
fn bench_shard(c: &mut Criterion) {
    let shard = TtlShard::open(0, &memory_config()).unwrap();
    for i in 0..100_000 {
        shard.put(format!("key:{}", i), format!("value:{}", i), Ttl::Never);
    }

    let mut group = c.benchmark_group("shard");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put", |b| {
        let mut i = 0u64;
        let ttl = Ttl::After(Duration::from_secs(3600));
        b.iter(|| {
            black_box(shard.put(format!("new:{}", i), "value".to_string(), ttl));
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(shard.get(&format!("key:{}", i % 100_000)));
            i += 1;
        });
    });

    group.bench_function("cleanup_nothing_expired", |b| {
        b.iter(|| black_box(shard.cleanup_expired()));
    });

    group.finish();
}

/// Benchmark requests routed through a 5-shard ring
fn bench_router(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let router = rt.block_on(async {
        let shards = (0..5)
            .map(|i| Arc::new(TtlShard::open(i, &memory_config()).unwrap()))
            .collect();
        let mut router = Router::new(shards, RouterConfig::default()).unwrap();
        router.run().unwrap();

        for i in 0..10_000 {
            router.set(format!("key:{}", i), "value").await.unwrap();
        }
        Arc::new(router)
    });
    let shared = Arc::clone(&router);
    let router = &*router;

    let mut group = c.benchmark_group("router");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("new:{}", i);
            async move { black_box(router.set(key, "value").await.unwrap()) }
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("key:{}", i % 10_000);
            async move { black_box(router.get(key).await.unwrap()) }
        });
    });

    // Every miss visits all five shards
    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("missing:{}", i);
            async move { black_box(router.get(key).await.unwrap()) }
        });
    });

    group.bench_function("concurrent_mixed_64", |b| {
        b.to_async(&rt).iter(|| {
            let shared = Arc::clone(&shared);
            async move {
                let mut tasks = JoinSet::new();
                for i in 0..64u64 {
                    let router = Arc::clone(&shared);
                    tasks.spawn(async move {
                        if i % 5 == 0 {
                            router.set(format!("mixed:{}", i), "value").await.map(|_| None)
                        } else {
                            router.get(format!("key:{}", i)).await
                        }
                    });
                }
                while let Some(result) = tasks.join_next().await {
                    black_box(result.unwrap().unwrap());
                }
            }
        });
    });

    group.finish();

    rt.block_on(shared.stop());
}

criterion_group!(benches, bench_codec, bench_shard, bench_router);

criterion_main!(benches);
