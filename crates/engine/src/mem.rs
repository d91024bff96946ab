//! A memtable: one WAL file coupled to one sorted index.
//!
//! Writes hit the WAL before the index, so an entry is never visible in
//! memory unless it is on the log. The memtable's WAL fid doubles as the id
//! of the table it is eventually flushed to.

use config::Config;
use memtable::{check_key, parse_ts, Entry, IndexError, SortedIndex};
use std::fs;
use tracing::debug;
use wal::{WalFile, WalRecord};

use crate::error::{EngineError, Result};

pub struct Memtable {
    wal: WalFile,
    index: SortedIndex,
    max_version: u64,
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("fid", &self.wal.fid())
            .field("wal_size", &self.wal.size())
            .field("entries", &self.index.len())
            .field("max_version", &self.max_version)
            .finish()
    }
}

impl Memtable {
    /// Creates an empty memtable backed by a new WAL file for `fid`.
    pub fn new(config: &Config, fid: u64) -> Result<Self> {
        let wal = WalFile::open(config.wal_path(fid), fid, config.wal_sync)?;
        Ok(Self {
            wal,
            index: SortedIndex::new(),
            max_version: 0,
        })
    }

    /// Rebuilds the memtable for `fid` from its WAL, then truncates the WAL
    /// to the end of its last valid record.
    ///
    /// # Errors
    ///
    /// A complete frame with a bad checksum, or a record that passes its
    /// checksum but carries an unusable key, is a hard error and leaves the
    /// WAL untouched. A torn tail is not an error.
    pub fn recover(config: &Config, fid: u64) -> Result<Self> {
        let mut wal = WalFile::open(config.wal_path(fid), fid, config.wal_sync)?;
        let mut index = SortedIndex::new();
        let mut max_version = 0u64;

        let end = wal.iterate(0, |rec| -> std::result::Result<(), IndexError> {
            let ts = parse_ts(&rec.key);
            index.insert(Entry::new(rec.key, rec.value).with_meta(rec.meta))?;
            max_version = max_version.max(ts);
            Ok(())
        })?;
        let size = wal.size();
        wal.truncate(end)?;

        debug!(
            fid,
            records = index.len(),
            truncated = size - end,
            max_version,
            "memtable recovered"
        );
        Ok(Self {
            wal,
            index,
            max_version,
        })
    }

    /// Appends `entry` to the WAL, then inserts it into the index.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidKey`] before anything is written, or the WAL
    /// failure (the index is then left untouched).
    pub fn set(&mut self, entry: Entry) -> Result<()> {
        if !check_key(&entry.key) {
            return Err(EngineError::InvalidKey {
                len: entry.key.len(),
            });
        }
        self.wal.append(&WalRecord::new(
            entry.key.clone(),
            entry.value.clone(),
            entry.meta,
        ))?;

        let version = entry.version();
        self.index
            .insert(entry)
            .map_err(|IndexError::InvalidKey { len }| EngineError::InvalidKey { len })?;
        self.max_version = self.max_version.max(version);
        Ok(())
    }

    /// Exact lookup of a versioned key.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.index.search(key)
    }

    /// Entries in ascending versioned-key order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.index.iter()
    }

    #[must_use]
    pub fn fid(&self) -> u64 {
        self.wal.fid()
    }

    /// Bytes written to the WAL so far.
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.wal.size()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Highest version seen by `set` or recovery.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    /// Syncs the WAL and releases the index. The WAL file stays on disk.
    pub fn close(&mut self) -> Result<()> {
        self.wal.sync()?;
        self.index.close();
        Ok(())
    }

    /// Closes the memtable and removes its WAL file. Used once its contents
    /// are persisted elsewhere (or it never had any).
    pub fn delete(mut self) -> Result<()> {
        self.close()?;
        let path = self.wal.path().to_path_buf();
        drop(self);
        fs::remove_file(&path)?;
        Ok(())
    }
}
