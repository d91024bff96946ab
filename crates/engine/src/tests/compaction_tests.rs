use anyhow::Result;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use super::helpers::{config, count_files, entry, fill, fill_key, init_tracing, SMALL_MEMTABLE};
use crate::Engine;

fn open_with_trigger(dir: &Path, trigger: usize) -> crate::Result<Engine> {
    let mut cfg = config(dir, SMALL_MEMTABLE);
    cfg.num_level_zero_tables = trigger;
    Engine::open(cfg)
}

// ---- Manual rounds ----

#[test]
fn disabled_trigger_never_compacts() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 0)?;
    fill(&mut engine, 0..13)?;

    assert!(!engine.compact()?);
    assert_eq!(engine.level_table_counts()[0], 4);
    Ok(())
}

#[test]
fn below_trigger_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 3)?;
    fill(&mut engine, 0..7)?;

    assert!(!engine.compact()?);
    assert_eq!(engine.level_table_counts(), vec![2, 0]);
    Ok(())
}

#[test]
fn l0_is_merged_into_l1() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 2)?;
    fill(&mut engine, 0..7)?;
    assert_eq!(engine.manifest().level_ids(0), vec![1, 2]);

    assert!(engine.compact()?);
    assert_eq!(engine.level_table_counts(), vec![0, 1]);

    let manifest = engine.manifest();
    assert!(manifest.level_ids(0).is_empty());
    assert_eq!(manifest.level_ids(1), vec![4]);
    assert_eq!(manifest.creations, 3);
    assert_eq!(manifest.deletions, 2);

    assert_eq!(count_files(dir.path(), "sst"), 1);
    assert!(engine.config().table_path(4).exists());
    assert!(!engine.config().table_path(1).exists());
    assert!(!engine.config().table_path(2).exists());

    for i in 0..7 {
        assert_eq!(engine.get(&fill_key(i))?.unwrap().value, b"val");
    }
    Ok(())
}

#[test]
fn second_round_folds_old_l1_in() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 2)?;
    fill(&mut engine, 0..7)?;
    assert!(engine.compact()?);

    fill(&mut engine, 7..13)?;
    assert_eq!(engine.level_table_counts(), vec![2, 1]);
    assert!(engine.compact()?);
    assert_eq!(engine.level_table_counts(), vec![0, 1]);
    assert_eq!(engine.manifest().live_tables(), 1);
    assert_eq!(count_files(dir.path(), "sst"), 1);

    for i in 0..13 {
        assert!(engine.get(&fill_key(i))?.is_some(), "key {} lost", i);
    }
    Ok(())
}

#[test]
fn newest_copy_wins_in_merge() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 2)?;

    engine.set(entry(b"kxxx", 5, b"old"))?;
    fill(&mut engine, 0..3)?;
    engine.set(entry(b"kxxx", 5, b"new"))?;
    fill(&mut engine, 3..6)?;
    assert_eq!(engine.level_table_counts()[0], 2);

    assert!(engine.compact()?);
    // Reopen so the read is served by the compacted table.
    engine.close()?;
    let engine = open_with_trigger(dir.path(), 2)?;
    assert_eq!(engine.level_table_counts(), vec![0, 1]);
    assert_eq!(engine.get(&entry(b"kxxx", 5, b"").key)?.unwrap().value, b"new");
    Ok(())
}

#[test]
fn compacted_layout_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut engine = open_with_trigger(dir.path(), 2)?;
        fill(&mut engine, 0..7)?;
        assert!(engine.compact()?);
    }

    let engine = open_with_trigger(dir.path(), 2)?;
    assert_eq!(engine.level_table_counts(), vec![0, 1]);
    assert_eq!(engine.manifest().level_ids(1), vec![4]);
    for i in 0..7 {
        assert!(engine.get(&fill_key(i))?.is_some());
    }
    Ok(())
}

// ---- Background workers ----

#[test]
fn background_compacter_drains_l0() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 2)?;
    engine.start_compacter()?;

    fill(&mut engine, 0..7)?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.level_table_counts()[0] > 0 {
        assert!(Instant::now() < deadline, "compacter never ran");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(engine.level_table_counts()[1], 1);

    engine.close()?;
    Ok(())
}

#[test]
fn close_stops_compacters() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = open_with_trigger(dir.path(), 2)?;
    engine.start_compacter()?;
    engine.close()?;
    assert!(engine.closer.is_signalled());
    assert!(engine.start_compacter().is_err());
    Ok(())
}
