//! Error types for the engine.
//!
//! Every failure the engine can surface is one of these variants. Manifest
//! header, checksum and structural errors are fatal at open time; nothing
//! here is retried automatically.

use config::ConfigError;
use sstable::TableError;
use thiserror::Error;
use wal::WalError;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// A manifest mutation that contradicts the current manifest state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("table {id} created twice")]
    DuplicateCreate { id: u64 },

    #[error("table {id} deleted but not tracked")]
    DeleteOfMissing { id: u64 },

    #[error("unknown manifest operation tag {tag}")]
    UnknownOperation { tag: u8 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    // -------------------------------------------------------------------------
    // Manifest
    // -------------------------------------------------------------------------
    #[error("manifest has bad magic")]
    BadMagic,

    #[error("unsupported manifest version {found} (expected {expected})")]
    UnsupportedManifestVersion { found: u32, expected: u32 },

    #[error("manifest checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("manifest corruption: {0}")]
    StructuralCorruption(#[from] Corruption),

    /// A frame passed its checksum but its payload does not decode.
    #[error("undecodable change set: {reason}")]
    Decode { reason: String },

    /// The manifest tracks a table whose file is gone.
    #[error("table {id} is in the manifest but missing from disk")]
    TableMissing { id: u64 },

    // -------------------------------------------------------------------------
    // I/O and collaborators
    // -------------------------------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    // -------------------------------------------------------------------------
    // Usage
    // -------------------------------------------------------------------------
    /// Keys must carry at least one byte plus the 8-byte version.
    #[error("invalid key: {len} bytes")]
    InvalidKey { len: usize },

    #[error("engine is closed")]
    Closed,
}
