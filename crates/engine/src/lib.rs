//! # Engine - EbbKV Storage Engine
//!
//! The orchestrator that ties the [`memtable`], [`wal`] and [`sstable`]
//! crates together with a manifest log into an LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                      ENGINE                       │
//! │                                                   │
//! │ write.rs → active memtable (WAL append → insert)  │
//! │              |                                    │
//! │              |  (WAL would exceed memtable_size?) │
//! │              |            yes                     │
//! │              v                                    │
//! │           seal → immutable queue                  │
//! │              |                                    │
//! │              v                                    │
//! │           flush → L0 table + manifest CREATE      │
//! │                                                   │
//! │ compacter threads: L0 + L1 → one L1 table         │
//! │                                                   │
//! │ read.rs → active → immutables → L0 → L1           │
//! │            (first match wins)                     │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                               |
//! |----------------|-------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, accessors, `close`, `Debug`, `Drop`  |
//! | [`recovery`]   | `Engine::open`: manifest, WAL replay, fid allocator   |
//! | `write`        | `set()`, sealing and synchronous flushing            |
//! | `read`         | `get()`, `max_version()`                              |
//! | `compaction`   | `start_compacter()`, `compact()`                      |
//! | [`manifest`]   | Append-only table level log with rewrite              |
//! | [`levels`]     | Table files per level, flush and compaction           |
//! | [`closer`]     | Counted shutdown for background workers               |
//!
//! ## Crash Safety
//!
//! Every write is appended to its memtable's WAL **before** the index
//! update. A WAL file is only removed **after** its table is written and
//! recorded in the manifest. Table files are written via temp file + rename;
//! the manifest is appended with fsync and compacted via rename.
//!
//! ## Concurrency
//!
//! `set` takes `&mut self`: writers are serialized by the caller. Reads and
//! background compaction share the level manager, whose manifest mutations
//! are serialized by the manifest lock.

pub mod change;
pub mod closer;
mod compaction;
pub mod error;
pub mod levels;
pub mod manifest;
mod mem;
mod read;
pub mod recovery;
mod write;

use config::Config;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

pub use change::{Change, ChangeSet, Operation};
pub use closer::{Closer, CloserGuard};
pub use error::{Corruption, EngineError, Result};
pub use levels::LevelManager;
pub use manifest::{Manifest, ManifestFile, TableManifest, TableMeta};
pub use mem::Memtable;

/// The storage engine: one active memtable, a queue of sealed memtables and
/// the level manager.
///
/// # Write Path
///
/// 1. If the active WAL would outgrow `memtable_size`, seal the active
///    memtable into the immutable queue and start a new one.
/// 2. Append the entry to the active WAL, then insert it into the index.
/// 3. Flush every sealed memtable, oldest first, to a level-0 table.
///
/// # Read Path
///
/// Active memtable, then immutables newest first, then the levels.
///
/// # Recovery
///
/// See [`Engine::open`].
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) active: Memtable,
    /// Sealed memtables, oldest at the front.
    pub(crate) immutables: VecDeque<Memtable>,
    pub(crate) levels: Arc<LevelManager>,
    pub(crate) closer: Closer,
    pub(crate) closed: bool,
    /// Highest version written or found at open; never decreases.
    pub(crate) max_version: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("work_dir", &self.config.work_dir)
            .field("memtable_size", &self.config.memtable_size)
            .field("active_fid", &self.active.fid())
            .field("active_wal_size", &self.active.wal_size())
            .field("immutables", &self.immutables.len())
            .field("levels", &self.levels)
            .field("closed", &self.closed)
            .field("max_version", &self.max_version)
            .finish()
    }
}

impl Engine {
    /// Closes the active memtable, every immutable and the level manager,
    /// then stops the compacters and waits for them to exit.
    ///
    /// The compacters are stopped even if closing a file fails; the first
    /// error is returned. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.close_files();
        self.closer.signal_and_wait();
        info!(work_dir = %self.config.work_dir.display(), "engine closed");
        result
    }

    fn close_files(&mut self) -> Result<()> {
        self.active.close()?;
        for mem in self.immutables.iter_mut() {
            mem.close()?;
        }
        self.levels.close()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of sealed memtables waiting to be flushed.
    #[must_use]
    pub fn immutable_count(&self) -> usize {
        self.immutables.len()
    }

    /// File id of the active memtable's WAL.
    #[must_use]
    pub fn active_fid(&self) -> u64 {
        self.active.fid()
    }

    /// Snapshot of the manifest.
    pub fn manifest(&self) -> Manifest {
        self.levels.manifest()
    }

    /// Number of open tables per level.
    pub fn level_table_counts(&self) -> Vec<usize> {
        self.levels.table_counts()
    }
}

/// Best-effort close on drop.
///
/// Errors are ignored because `Drop` cannot propagate them; every write is
/// already on a WAL and is recovered on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
