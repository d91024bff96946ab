//! Write path: `set()`, memtable sealing and the synchronous flush of
//! sealed memtables.

use memtable::{check_key, Entry};
use tracing::debug;
use wal::estimate_encoded_size;

use crate::error::{EngineError, Result};
use crate::mem::Memtable;
use crate::Engine;

impl Engine {
    /// Writes `entry` (a versioned key, see [`memtable::key_with_ts`]).
    ///
    /// If the active WAL would grow past `memtable_size`, the active
    /// memtable is sealed first. The entry then goes to the active WAL and
    /// index, and every sealed memtable is flushed before the call returns.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidKey`] for keys of 8 bytes or fewer,
    /// [`EngineError::Closed`] after [`close`](Engine::close), or a WAL,
    /// table or manifest failure. A failed flush leaves the unflushed
    /// memtables queued; the next `set` retries them.
    pub fn set(&mut self, entry: Entry) -> Result<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if !check_key(&entry.key) {
            return Err(EngineError::InvalidKey {
                len: entry.key.len(),
            });
        }

        let estimate = estimate_encoded_size(entry.key.len(), entry.value.len());
        if self.active.wal_size() + estimate > self.config.memtable_size {
            self.seal_active()?;
        }

        let version = entry.version();
        self.active.set(entry)?;
        self.max_version = self.max_version.max(version);
        self.flush_immutables()
    }

    /// Moves the active memtable to the back of the immutable queue and
    /// replaces it with a fresh one.
    fn seal_active(&mut self) -> Result<()> {
        let fresh = Memtable::new(&self.config, self.levels.next_fid())?;
        let sealed = std::mem::replace(&mut self.active, fresh);
        debug!(
            fid = sealed.fid(),
            entries = sealed.len(),
            wal_size = sealed.wal_size(),
            "memtable sealed"
        );
        self.immutables.push_back(sealed);
        Ok(())
    }

    /// Flushes sealed memtables oldest first, removing each one (and its
    /// WAL) as soon as its table is recorded in the manifest.
    pub(crate) fn flush_immutables(&mut self) -> Result<()> {
        while let Some(mem) = self.immutables.front() {
            self.levels.flush(mem)?;
            if let Some(mem) = self.immutables.pop_front() {
                mem.delete()?;
            }
        }
        Ok(())
    }
}
