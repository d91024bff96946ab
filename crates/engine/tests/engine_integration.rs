//! End-to-end tests through the public API only.

use anyhow::Result;
use config::{Config, MANIFEST_FILENAME};
use engine::{Change, Engine, EngineError, ManifestFile};
use memtable::{key_with_ts, Entry};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn store_config(dir: &Path) -> Config {
    Config::builder()
        .work_dir(dir)
        .memtable_size(4 * 1024)
        .wal_sync(true)
        .num_level_zero_tables(3)
        .build()
}

fn doc(id: u64, version: u64) -> Vec<u8> {
    key_with_ts(format!("doc:{:06}", id).as_bytes(), version)
}

fn value(id: u64, version: u64) -> Vec<u8> {
    format!("doc {} at v{} {}", id, version, "~".repeat(64)).into_bytes()
}

// ---- Manifest scenarios ----

#[test]
fn manifest_create_create_delete_reopen() -> Result<()> {
    let dir = tempdir()?;
    let config = Config::builder().work_dir(dir.path()).build();
    {
        let mf = ManifestFile::open(&config)?;
        mf.add_changes(vec![Change::create(1, 0, Vec::new())])?;
        mf.add_changes(vec![Change::create(2, 0, Vec::new())])?;
        mf.add_changes(vec![Change::delete(1)])?;
        mf.close()?;
    }

    let m = ManifestFile::open(&config)?.manifest();
    assert_eq!(m.tables.keys().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(m.tables[&2].level, 0);
    assert_eq!(m.creations, 2);
    assert_eq!(m.deletions, 1);
    assert_eq!(m.level_ids(0), vec![2]);
    Ok(())
}

#[test]
fn manifest_rewrites_once_deletions_dominate() -> Result<()> {
    let dir = tempdir()?;
    let config = Config::builder()
        .work_dir(dir.path())
        .deletions_rewrite_threshold(1)
        .deletions_ratio(1)
        .build();
    let path = dir.path().join(MANIFEST_FILENAME);

    let mf = ManifestFile::open(&config)?;
    let empty_len = fs::metadata(&path)?.len();
    mf.add_changes(vec![Change::create(1, 0, Vec::new())])?;
    mf.add_changes(vec![Change::create(2, 0, Vec::new())])?;

    let before = fs::metadata(&path)?.len();
    mf.add_changes(vec![Change::delete(1)])?;
    assert!(fs::metadata(&path)?.len() > before);

    mf.add_changes(vec![Change::delete(2)])?;
    let m = mf.manifest();
    assert_eq!((m.creations, m.deletions), (0, 0));
    assert!(m.tables.is_empty());
    assert_eq!(fs::metadata(&path)?.len(), empty_len);
    drop(mf);

    assert!(ManifestFile::open(&config)?.manifest().tables.is_empty());
    Ok(())
}

// ---- Engine lifecycle ----

#[test]
fn writes_survive_restart_across_every_tier() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = Engine::open(store_config(dir.path()))?;
        for id in 0..300 {
            engine.set(Entry::new(doc(id, 1), value(id, 1)))?;
        }
        assert!(engine.level_table_counts()[0] >= 3);
        while engine.compact()? {}
        for id in 0..50 {
            engine.set(Entry::new(doc(id, 2), value(id, 2)))?;
        }
        engine.close()?;
    }

    let engine = Engine::open(store_config(dir.path()))?;
    for id in 0..300 {
        let got = engine.get(&doc(id, 1))?.expect("v1 present");
        assert_eq!(got.value, value(id, 1));
    }
    for id in 0..50 {
        let got = engine.get(&doc(id, 2))?.expect("v2 present");
        assert_eq!(got.value, value(id, 2));
    }
    assert!(engine.get(&doc(60, 2))?.is_none());
    assert_eq!(engine.max_version(), 2);
    Ok(())
}

#[test]
fn background_compaction_and_close() -> Result<()> {
    let dir = tempdir()?;
    let config = Config::builder()
        .work_dir(dir.path())
        .memtable_size(4 * 1024)
        .wal_sync(false)
        .num_level_zero_tables(2)
        .num_compactors(2)
        .compaction_interval(std::time::Duration::from_millis(5))
        .build();

    let mut engine = Engine::open(config.clone())?;
    engine.start_compacter()?;
    for id in 0..500 {
        engine.set(Entry::new(doc(id, 1), value(id, 1)))?;
    }
    engine.close()?;

    let engine = Engine::open(config)?;
    let manifest = engine.manifest();
    assert_eq!(manifest.live_tables(), engine.level_table_counts().iter().sum::<usize>());
    for id in 0..500 {
        assert!(engine.get(&doc(id, 1))?.is_some(), "doc {} lost", id);
    }
    Ok(())
}

#[test]
fn lost_table_refuses_to_open() -> Result<()> {
    let dir = tempdir()?;
    let config = store_config(dir.path());
    {
        let mut engine = Engine::open(config.clone())?;
        for id in 0..100 {
            engine.set(Entry::new(doc(id, 1), value(id, 1)))?;
        }
    }

    let manifest = ManifestFile::open(&config)?.manifest();
    let victim = manifest.level_ids(0)[0];
    fs::remove_file(config.table_path(victim))?;

    match Engine::open(config) {
        Err(EngineError::TableMissing { id }) => assert_eq!(id, victim),
        other => panic!("expected TableMissing, got {:?}", other),
    }
    Ok(())
}
