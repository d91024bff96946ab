use config::Config;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Change, Engine, ManifestFile};
use memtable::{key_with_ts, Entry};
use std::path::Path;
use tempfile::tempdir;

const N_KEYS: u64 = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_config(dir: &Path) -> Config {
    Config::builder()
        .work_dir(dir)
        .memtable_size(256 * 1024)
        .wal_sync(false)
        .num_level_zero_tables(0)
        .build()
}

fn key(i: u64) -> Vec<u8> {
    key_with_ts(format!("key{}", i).as_bytes(), i)
}

fn fill(engine: &mut Engine) {
    for i in 0..N_KEYS {
        engine
            .set(Entry::new(key(i), vec![b'x'; VALUE_SIZE]))
            .unwrap();
    }
}

fn engine_set_benchmark(c: &mut Criterion) {
    c.bench_function("engine_set_10k_with_flushes", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let engine = Engine::open(bench_config(dir.path())).unwrap();
                (dir, engine)
            },
            |(_dir, mut engine)| fill(&mut engine),
            BatchSize::SmallInput,
        );
    });
}

fn engine_get_benchmark(c: &mut Criterion) {
    c.bench_function("engine_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut engine = Engine::open(bench_config(dir.path())).unwrap();
                fill(&mut engine);
                (dir, engine)
            },
            |(_dir, engine)| {
                for i in 0..N_KEYS {
                    assert!(engine.get(&key(i)).unwrap().is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn manifest_append_benchmark(c: &mut Criterion) {
    c.bench_function("manifest_create_delete_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mf = ManifestFile::open(&bench_config(dir.path())).unwrap();
                (dir, mf)
            },
            |(_dir, mf)| {
                for id in 1..=1_000u64 {
                    mf.add_changes(vec![Change::create(id, 0, vec![0; 4])])
                        .unwrap();
                    mf.add_changes(vec![Change::delete(id)]).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    engine_set_benchmark,
    engine_get_benchmark,
    manifest_append_benchmark
);
criterion_main!(benches);
