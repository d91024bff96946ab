//! Cold-start path: manifest and table reconciliation, WAL replay and the
//! file id allocator.

use config::{parse_wal_fid, Config, MANIFEST_REWRITE_FILENAME};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::closer::Closer;
use crate::error::Result;
use crate::levels::LevelManager;
use crate::mem::Memtable;
use crate::Engine;

/// Lists the fids of every WAL file in `dir`, ascending.
pub fn wal_fids(dir: &Path) -> Result<Vec<u64>> {
    let mut fids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(fid) = entry.file_name().to_str().and_then(parse_wal_fid) {
            fids.push(fid);
        }
    }
    fids.sort_unstable();
    Ok(fids)
}

impl Engine {
    /// Opens (or creates) the store in `config.work_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the working directory and drop leftovers of interrupted
    ///    table writes and manifest rewrites.
    /// 2. Open the level manager: replay the manifest, delete untracked
    ///    tables, fail if a tracked table is missing, open every table.
    /// 3. Replay each WAL in ascending fid order. A WAL already flushed to a
    ///    tracked table is removed; an empty one is discarded; the rest are
    ///    queued as immutables.
    /// 4. Advance the fid allocator past every id seen, start a fresh
    ///    active memtable and seed the version high-water mark from the
    ///    tables and recovered memtables.
    ///
    /// Compacters are not started; see [`Engine::start_compacter`].
    ///
    /// # Errors
    ///
    /// Invalid configuration, any fatal manifest error, a missing table, or
    /// a WAL that cannot be replayed.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.work_dir)?;
        Self::cleanup_tmp_files(&config.work_dir);

        let levels = LevelManager::open(&config)?;
        let manifest = levels.manifest();

        let mut immutables = VecDeque::new();
        for fid in wal_fids(&config.work_dir)? {
            levels.advance_fid(fid);

            if manifest.contains(fid) {
                info!(fid, "wal already flushed to a table, removing");
                fs::remove_file(config.wal_path(fid))?;
                continue;
            }

            let mem = Memtable::recover(&config, fid)?;
            if mem.is_empty() {
                debug!(fid, "discarding empty wal");
                mem.delete()?;
                continue;
            }
            immutables.push_back(mem);
        }

        let active = Memtable::new(&config, levels.next_fid())?;
        let max_version = immutables
            .iter()
            .map(Memtable::max_version)
            .fold(levels.max_version(), u64::max);

        info!(
            work_dir = %config.work_dir.display(),
            tables = manifest.live_tables(),
            immutables = immutables.len(),
            active_fid = active.fid(),
            max_version,
            "engine opened"
        );

        Ok(Self {
            config,
            active,
            immutables,
            levels: Arc::new(levels),
            closer: Closer::new(),
            closed: false,
            max_version,
        })
    }

    /// Removes `.sst.tmp` files from interrupted flushes and a stale
    /// `REWRITEMANIFEST` from an interrupted rewrite.
    pub(crate) fn cleanup_tmp_files(dir: &Path) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name.ends_with(".sst.tmp") || name == MANIFEST_REWRITE_FILENAME {
                        debug!(file = name, "removing leftover temp file");
                        let _ = fs::remove_file(&p);
                    }
                }
            }
        }
    }
}
