//! Engine micro-benchmarks
//!
//! The parameter grid mirrors the classic embedded-KV harnesses: key
//! count, fixed-width integer keys vs zero-padded string keys,
//! sequential vs random order, and batched vs unbatched writes. Values
//! are 100 bytes. Only the public get/put/batch/iterator API is driven.
//!
//! Run with: `cargo bench --bench engine_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

use stratadb::{Engine, Options, WriteBatch};

const VAL_SIZE: usize = 100;
const STRING_KEY_LENGTH: usize = 16;

/// Fixed-width big-endian integer key (sorts numerically)
fn int_key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

/// Zero-padded decimal string key
fn string_key(i: u32) -> Vec<u8> {
    format!("{:0width$}", i, width = STRING_KEY_LENGTH).into_bytes()
}

fn make_keys(num: u32, int_keys: bool, sequential: bool) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = (0..num)
        .map(|i| if int_keys { int_key(i) } else { string_key(i) })
        .collect();
    if !sequential {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        keys.shuffle(&mut rng);
    }
    keys
}

fn open_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().expect("bench scratch dir");
    let engine = Engine::open(dir.path().join("db"), Options::default()).expect("open");
    (dir, engine)
}

fn preloaded(keys: &[Vec<u8>]) -> (tempfile::TempDir, Engine) {
    let (dir, engine) = open_engine();
    let ks = engine.default_keyspace().unwrap();
    let value = vec![0xabu8; VAL_SIZE];
    let mut batch = WriteBatch::new();
    for key in keys {
        batch.put(&ks, key, &value);
    }
    engine.write(&batch).unwrap();
    (dir, engine)
}

fn bench_write(c: &mut Criterion) {
    let num: u32 = 10_000;
    let mut group = c.benchmark_group("write");
    group.sample_size(20);
    group.throughput(Throughput::Elements(num as u64));

    for int_keys in [true, false] {
        for sequential in [true, false] {
            let label = format!(
                "{}/{}",
                if int_keys { "intkey" } else { "strkey" },
                if sequential { "seq" } else { "rnd" }
            );
            let keys = make_keys(num, int_keys, sequential);
            let value = vec![0xabu8; VAL_SIZE];

            group.bench_function(BenchmarkId::new("unbatched", &label), |b| {
                b.iter(|| {
                    let (_dir, engine) = open_engine();
                    let ks = engine.default_keyspace().unwrap();
                    for key in &keys {
                        ks.put(key, &value).unwrap();
                    }
                    black_box(engine.sequence())
                });
            });

            group.bench_function(BenchmarkId::new("batched", &label), |b| {
                b.iter(|| {
                    let (_dir, engine) = open_engine();
                    let ks = engine.default_keyspace().unwrap();
                    let mut batch = WriteBatch::new();
                    for key in &keys {
                        batch.put(&ks, key, &value);
                    }
                    engine.write(&batch).unwrap();
                    black_box(engine.sequence())
                });
            });
        }
    }
    group.finish();
}

fn bench_read_key(c: &mut Criterion) {
    let num: u32 = 10_000;
    let mut group = c.benchmark_group("read_key");
    group.throughput(Throughput::Elements(num as u64));

    for int_keys in [true, false] {
        for sequential in [true, false] {
            let label = format!(
                "{}/{}",
                if int_keys { "intkey" } else { "strkey" },
                if sequential { "seq" } else { "rnd" }
            );
            let keys = make_keys(num, int_keys, sequential);
            let (_dir, engine) = preloaded(&keys);
            let ks = engine.default_keyspace().unwrap();

            group.bench_function(&label, |b| {
                b.iter(|| {
                    for key in &keys {
                        black_box(ks.get(key).unwrap());
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_read_seq(c: &mut Criterion) {
    let num: u32 = 10_000;
    let keys = make_keys(num, true, true);
    let (_dir, engine) = preloaded(&keys);
    let ks = engine.default_keyspace().unwrap();

    let mut group = c.benchmark_group("read_scan");
    group.throughput(Throughput::Elements(num as u64));

    group.bench_function("forward", |b| {
        b.iter(|| {
            let mut iter = ks.iter().unwrap();
            let mut sum = 0usize;
            iter.seek_to_first().unwrap();
            while iter.is_valid() {
                sum += iter.value().unwrap().len();
                iter.next().unwrap();
            }
            black_box(sum)
        });
    });

    group.bench_function("reverse", |b| {
        b.iter(|| {
            let mut iter = ks.iter().unwrap();
            let mut sum = 0usize;
            iter.seek_to_last().unwrap();
            while iter.is_valid() {
                sum += iter.value().unwrap().len();
                iter.prev().unwrap();
            }
            black_box(sum)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_write, bench_read_key, bench_read_seq);
criterion_main!(benches);
