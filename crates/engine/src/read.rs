//! Read path: `get()` and version tracking.

use memtable::{check_key, Entry};

use crate::error::{EngineError, Result};
use crate::Engine;

impl Engine {
    /// Looks up an exact versioned key.
    ///
    /// Checks the active memtable, then sealed memtables from newest to
    /// oldest, then the levels. The first match wins, so the most recent
    /// write of a key shadows older copies in lower tiers.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidKey`], [`EngineError::Closed`], or a table read
    /// failure (including a CRC mismatch).
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if !check_key(key) {
            return Err(EngineError::InvalidKey { len: key.len() });
        }

        if let Some(entry) = self.active.get(key) {
            return Ok(Some(entry.clone()));
        }
        for mem in self.immutables.iter().rev() {
            if let Some(entry) = mem.get(key) {
                return Ok(Some(entry.clone()));
            }
        }
        self.levels.get(key)
    }

    /// Highest version ever written to this store.
    ///
    /// Seeded at open from every table and recovered WAL, then raised by each
    /// successful `set`. Flushing does not lower it.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.max_version
    }
}
