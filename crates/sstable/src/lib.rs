//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk table files produced when the engine flushes a
//! memtable or compacts a level.
//!
//! Tables are *write-once, read-many*. A table is identified by the numeric
//! file id in its name; the manifest records which ids are live and at which
//! level, together with the whole-file CRC32 returned by
//! [`TableWriter::write`].
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (records in ascending versioned-key order)        │
//! │                                                               │
//! │ crc32 (u32) | meta (u8) | key_len (u32) | key                  │
//! │ val_len (u32) | value                                          │
//! │                                                               │
//! │ The CRC32 covers everything after itself in the record.        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (key -> data_offset mapping)                     │
//! │                                                               │
//! │ key_len (u32) | key | data_offset (u64)                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 20 bytes)                                  │
//! │                                                               │
//! │ entry_count (u64 LE) | index_offset (u64 LE) | magic "EBT1"    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

mod format;
mod merge;
mod reader;
mod writer;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use format::{FOOTER_BYTES, TABLE_MAGIC};
pub use merge::MergeIterator;
pub use reader::TableReader;
pub use writer::{TableInfo, TableWriter};

/// Errors raised while writing or reading a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Writing a table with no entries is refused.
    #[error("refusing to write an empty table")]
    Empty,

    /// Input keys were not strictly ascending in versioned order.
    #[error("entries out of order at position {position}")]
    Unsorted { position: usize },

    /// A key too short to carry a version suffix.
    #[error("invalid key: {len} bytes")]
    InvalidKey { len: usize },

    /// Structural damage in the file (bad footer, offsets, lengths).
    #[error("corrupt table {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A record failed its CRC32.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },
}

#[cfg(test)]
mod tests;
