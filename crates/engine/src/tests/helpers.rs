use config::Config;
use memtable::{key_with_ts, Entry};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::Engine;

/// Bytes one `fill` record occupies in a WAL: 5-byte user key, 8-byte
/// version, 3-byte value, plus framing.
pub const FILL_RECORD_BYTES: u64 = 33;

/// Three `fill` records fit in a memtable; the fourth seals it.
pub const SMALL_MEMTABLE: u64 = 3 * FILL_RECORD_BYTES + 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(dir: &Path, memtable_size: u64) -> Config {
    Config::builder()
        .work_dir(dir)
        .memtable_size(memtable_size)
        .wal_sync(false)
        .num_level_zero_tables(0)
        .compaction_interval(Duration::from_millis(10))
        .build()
}

pub fn open(dir: &Path, memtable_size: u64) -> crate::Result<Engine> {
    Engine::open(config(dir, memtable_size))
}

pub fn entry(user_key: &[u8], ts: u64, value: &[u8]) -> Entry {
    Entry::new(key_with_ts(user_key, ts), value.to_vec())
}

pub fn fill_key(i: u64) -> Vec<u8> {
    key_with_ts(format!("k{:04}", i).as_bytes(), 1)
}

/// Writes `fill_key(i) = "val"` for every `i` in `range`.
pub fn fill(engine: &mut Engine, range: std::ops::Range<u64>) -> crate::Result<()> {
    for i in range {
        engine.set(Entry::new(fill_key(i), b"val".to_vec()))?;
    }
    Ok(())
}

pub fn count_files(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|x| x == ext)
                .unwrap_or(false)
        })
        .count()
}
