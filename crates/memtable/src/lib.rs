//! # Memtable - Sorted In-Memory Index
//!
//! The ordered key → entry map that backs every memtable of the EbbKV
//! engine, together with the versioned-key ordering used by every other
//! component.
//!
//! The engine couples one [`SortedIndex`] with one write-ahead log; this
//! crate knows nothing about durability. Entries are inserted only after
//! the engine has made them durable on the log.

pub mod key;

use std::collections::BTreeMap;

use thiserror::Error;

pub use key::{check_key, compare_keys, key_with_ts, parse_key, parse_ts, VersionedKey};

/// A single write: versioned key, value and a free-form metadata byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// User key followed by an 8-byte big-endian version.
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Opaque metadata bits (`0` when unused).
    pub meta: u8,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            meta: 0,
        }
    }

    pub fn with_meta(mut self, meta: u8) -> Self {
        self.meta = meta;
        self
    }

    /// Version carried in the key suffix.
    #[must_use]
    pub fn version(&self) -> u64 {
        parse_ts(&self.key)
    }

    /// Bytes this entry contributes to [`SortedIndex::approx_size`].
    #[must_use]
    pub fn approx_size(&self) -> usize {
        self.key.len() + self.value.len() + 1
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Key is too short to carry a version suffix.
    #[error("invalid key: {len} bytes, need more than {}", key::VERSION_BYTES)]
    InvalidKey { len: usize },
}

/// Ordered map from versioned key to [`Entry`].
///
/// Re-inserting an identical versioned key replaces the previous entry:
/// the latest write of a given key/version pair wins.
#[derive(Debug, Default)]
pub struct SortedIndex {
    map: BTreeMap<VersionedKey, Entry>,
    approx_size: usize,
}

impl SortedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`, replacing any entry with the same versioned key.
    pub fn insert(&mut self, entry: Entry) -> Result<(), IndexError> {
        if !check_key(&entry.key) {
            return Err(IndexError::InvalidKey {
                len: entry.key.len(),
            });
        }
        self.approx_size += entry.approx_size();
        if let Some(old) = self.map.insert(VersionedKey(entry.key.clone()), entry) {
            self.approx_size = self.approx_size.saturating_sub(old.approx_size());
        }
        Ok(())
    }

    /// Exact lookup by versioned key.
    pub fn search(&self, key: &[u8]) -> Option<&Entry> {
        if !check_key(key) {
            return None;
        }
        self.map.get(&VersionedKey(key.to_vec()))
    }

    /// Entries in ascending versioned-key order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// Releases every entry.
    pub fn close(&mut self) {
        self.map.clear();
        self.approx_size = 0;
    }
}

#[cfg(test)]
mod tests;
