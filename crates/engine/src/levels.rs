//! Level manager: table files, their level layout and compaction.
//!
//! ```text
//! L0  [ 00012.sst, 00009.sst, 00004.sst ]   newest first, may overlap
//! L1  [ 00007.sst ]                         output of the last compaction
//! ```
//!
//! Every layout change goes through the [`ManifestFile`] before it becomes
//! visible in memory, so the manifest is always at least as new as what
//! readers see.

use config::Config;
use memtable::{parse_ts, Entry};
use parking_lot::{Mutex, RwLock};
use sstable::{MergeIterator, TableError, TableReader, TableWriter};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::change::Change;
use crate::closer::CloserGuard;
use crate::error::{EngineError, Result};
use crate::manifest::{load_table_ids, Manifest, ManifestFile, TableMeta};
use crate::mem::Memtable;

/// Level compaction writes into.
const COMPACTION_TARGET_LEVEL: u8 = 1;

#[derive(Clone)]
struct LevelTable {
    id: u64,
    reader: Arc<TableReader>,
}

pub struct LevelManager {
    config: Config,
    manifest: ManifestFile,
    /// Highest file id handed out so far (WAL and table ids share it).
    max_fid: AtomicU64,
    /// `levels[n]` holds level n's tables, newest first.
    levels: RwLock<Vec<Vec<LevelTable>>>,
    /// Held for the duration of a compaction.
    compaction: Mutex<()>,
}

impl std::fmt::Debug for LevelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelManager")
            .field("max_fid", &self.max_fid())
            .field("table_counts", &self.table_counts())
            .field("manifest", &self.manifest)
            .finish()
    }
}

impl LevelManager {
    /// Opens the manifest, reconciles it with the table files on disk and
    /// opens every tracked table.
    ///
    /// # Errors
    ///
    /// Fatal manifest errors, [`EngineError::TableMissing`], or a table
    /// whose checksum disagrees with the manifest.
    pub fn open(config: &Config) -> Result<Self> {
        let manifest = ManifestFile::open(config)?;
        let on_disk = load_table_ids(&config.work_dir)?;
        manifest.revert_to_manifest(&on_disk)?;

        let snapshot = manifest.manifest();
        let mut levels: Vec<Vec<LevelTable>> =
            vec![Vec::new(); snapshot.levels.len().max(COMPACTION_TARGET_LEVEL as usize + 1)];
        let mut max_fid = 0u64;

        for (level, ids) in snapshot.levels.iter().enumerate() {
            let mut ids: Vec<u64> = ids.iter().copied().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            for id in ids {
                let reader = TableReader::open(config.table_path(id))?;
                let tm = &snapshot.tables[&id];
                if !tm.checksum.is_empty() && tm.checksum != reader.checksum().to_be_bytes() {
                    return Err(EngineError::Table(TableError::Corrupt {
                        path: reader.path().to_path_buf(),
                        reason: "checksum does not match manifest".to_string(),
                    }));
                }
                max_fid = max_fid.max(id);
                levels[level].push(LevelTable {
                    id,
                    reader: Arc::new(reader),
                });
            }
        }

        info!(
            tables = snapshot.tables.len(),
            max_fid,
            "levels loaded"
        );
        Ok(Self {
            config: config.clone(),
            manifest,
            max_fid: AtomicU64::new(max_fid),
            levels: RwLock::new(levels),
            compaction: Mutex::new(()),
        })
    }

    /// Allocates a fresh file id.
    pub fn next_fid(&self) -> u64 {
        self.max_fid.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn max_fid(&self) -> u64 {
        self.max_fid.load(Ordering::SeqCst)
    }

    /// Moves the allocator past an id found on disk.
    pub fn advance_fid(&self, observed: u64) {
        self.max_fid.fetch_max(observed, Ordering::SeqCst);
    }

    /// Persists `mem` as table `mem.fid()` at level 0. Empty memtables are
    /// skipped.
    pub fn flush(&self, mem: &Memtable) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }
        let id = mem.fid();
        let path = self.config.table_path(id);
        let info = TableWriter::write(&path, mem.entries().cloned())?;
        let reader = TableReader::open(&path)?;

        self.manifest.add_table_meta(
            0,
            &TableMeta {
                id,
                checksum: info.checksum.to_be_bytes().to_vec(),
            },
        )?;
        self.levels.write()[0].insert(
            0,
            LevelTable {
                id,
                reader: Arc::new(reader),
            },
        );

        info!(id, entries = info.entries, "memtable flushed");
        Ok(())
    }

    /// Looks `key` up level by level; the first exact match wins.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let tables: Vec<Arc<TableReader>> = self
            .levels
            .read()
            .iter()
            .flatten()
            .map(|t| Arc::clone(&t.reader))
            .collect();

        for reader in tables {
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Highest version stored in any open table.
    pub fn max_version(&self) -> u64 {
        let levels = self.levels.read();
        levels
            .iter()
            .flatten()
            .flat_map(|t| t.reader.keys())
            .map(parse_ts)
            .max()
            .unwrap_or(0)
    }

    /// Merges every L0 and L1 table into one new L1 table once L0 has
    /// reached the configured trigger.
    ///
    /// Returns `false` when there was nothing to do or another compaction
    /// is already running.
    pub fn compact_once(&self) -> Result<bool> {
        let trigger = self.config.num_level_zero_tables;
        if trigger == 0 {
            return Ok(false);
        }
        let _running = match self.compaction.try_lock() {
            Some(guard) => guard,
            None => return Ok(false),
        };

        let inputs: Vec<LevelTable> = {
            let levels = self.levels.read();
            if levels[0].len() < trigger {
                return Ok(false);
            }
            levels[0]
                .iter()
                .chain(levels[COMPACTION_TARGET_LEVEL as usize].iter())
                .cloned()
                .collect()
        };

        let id = self.next_fid();
        let path = self.config.table_path(id);
        info!(id, inputs = inputs.len(), "compaction started");

        let readers: Vec<Arc<TableReader>> = inputs.iter().map(|t| Arc::clone(&t.reader)).collect();
        let mut merge = MergeIterator::new(&readers);
        let mut merge_error: Option<TableError> = None;
        let stream = std::iter::from_fn(|| match merge.next_entry() {
            Ok(entry) => entry,
            Err(e) => {
                merge_error = Some(e);
                None
            }
        });
        let written = TableWriter::write(&path, stream);
        if let Some(e) = merge_error {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        let info = written?;
        let reader = TableReader::open(&path)?;

        let mut changes: Vec<Change> = inputs.iter().map(|t| Change::delete(t.id)).collect();
        changes.push(Change::create(
            id,
            COMPACTION_TARGET_LEVEL,
            info.checksum.to_be_bytes().to_vec(),
        ));
        self.manifest.add_changes(changes)?;

        let compacted: HashSet<u64> = inputs.iter().map(|t| t.id).collect();
        {
            let mut levels = self.levels.write();
            for level in levels.iter_mut() {
                level.retain(|t| !compacted.contains(&t.id));
            }
            levels[COMPACTION_TARGET_LEVEL as usize].insert(
                0,
                LevelTable {
                    id,
                    reader: Arc::new(reader),
                },
            );
        }

        for t in &inputs {
            let path = self.config.table_path(t.id);
            if let Err(e) = fs::remove_file(&path) {
                warn!(id = t.id, error = %e, "failed to remove compacted table");
            }
        }

        info!(id, entries = info.entries, removed = inputs.len(), "compaction finished");
        Ok(true)
    }

    /// Background worker: polls [`compact_once`](Self::compact_once) until
    /// the closer signals.
    pub fn run_compacter(&self, worker: usize, guard: CloserGuard) {
        info!(worker, "compacter started");
        while !guard.wait_timeout(self.config.compaction_interval) {
            match self.compact_once() {
                Ok(true) => debug!(worker, "compaction round done"),
                Ok(false) => {}
                Err(e) => error!(worker, error = %e, "compaction failed"),
            }
        }
        info!(worker, "compacter stopped");
    }

    /// Snapshot of the manifest.
    pub fn manifest(&self) -> Manifest {
        self.manifest.manifest()
    }

    /// Number of open tables per level.
    pub fn table_counts(&self) -> Vec<usize> {
        self.levels.read().iter().map(Vec::len).collect()
    }

    /// Syncs the manifest.
    pub fn close(&self) -> Result<()> {
        self.manifest.close()
    }
}
