//! # Config - EbbKV Engine Configuration
//!
//! Centralised settings for the storage engine plus the file-naming
//! conventions shared by every crate in the workspace.
//!
//! ## Working directory layout
//!
//! ```text
//! {work_dir}/
//!   ├── MANIFEST           (table-to-level log)
//!   ├── REWRITEMANIFEST    (transient, only during a manifest rewrite)
//!   ├── 00007.wal          (write-ahead log of memtable 7)
//!   └── 00003.sst          (table 3)
//! ```
//!
//! ## Environment
//!
//! [`Config::from_env`] reads the following variables, falling back to
//! [`Config::default`] for anything unset:
//!
//! ```text
//! EBBKV_WORK_DIR            working directory          (default: "data")
//! EBBKV_MEMTABLE_KB         memtable size in KiB        (default: 65536)
//! EBBKV_WAL_SYNC            fsync every WAL append      (default: "true")
//! EBBKV_DELETIONS_THRESHOLD manifest rewrite threshold  (default: 10000)
//! EBBKV_DELETIONS_RATIO     manifest rewrite ratio      (default: 10)
//! EBBKV_COMPACTORS          compaction workers          (default: 1)
//! EBBKV_L0_TRIGGER          L0 tables before compaction (default: 4, 0 = off)
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Name of the manifest file inside the working directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file written during a manifest rewrite, then renamed over
/// [`MANIFEST_FILENAME`].
pub const MANIFEST_REWRITE_FILENAME: &str = "REWRITEMANIFEST";

/// Suffix of memtable write-ahead log files.
pub const WAL_FILE_EXT: &str = ".wal";

/// Suffix of table files.
pub const TABLE_FILE_EXT: &str = ".sst";

/// Default number of manifest deletions tolerated before a rewrite is considered.
pub const DEFAULT_DELETIONS_REWRITE_THRESHOLD: usize = 10_000;

/// Default deletions-to-live-tables ratio that triggers a manifest rewrite.
pub const DEFAULT_DELETIONS_RATIO: usize = 10;

/// Errors raised while building or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    /// The configuration is structurally unusable.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Engine configuration.
///
/// Cheap to clone. The engine hands an immutable copy to every memtable it
/// creates, so nothing downstream needs a reference back to the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the manifest, WAL files and table files.
    pub work_dir: PathBuf,

    /// WAL size (bytes) at which the active memtable is sealed.
    pub memtable_size: u64,

    /// If `true`, every WAL append is followed by `fsync`.
    pub wal_sync: bool,

    /// Absolute number of manifest deletions before a rewrite is considered.
    pub deletions_rewrite_threshold: usize,

    /// A rewrite happens once deletions exceed this multiple of live tables.
    pub deletions_ratio: usize,

    /// Number of background compaction workers started by the engine.
    pub num_compactors: usize,

    /// Number of L0 tables that triggers a compaction. `0` disables it.
    pub num_level_zero_tables: usize,

    /// How often an idle compaction worker checks for work.
    pub compaction_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("data"),
            memtable_size: 64 * 1024 * 1024, // 64 MiB
            wal_sync: true,
            deletions_rewrite_threshold: DEFAULT_DELETIONS_REWRITE_THRESHOLD,
            deletions_ratio: DEFAULT_DELETIONS_RATIO,
            num_compactors: 1,
            num_level_zero_tables: 4,
            compaction_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Creates a new config builder seeded with the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Builds a config from `EBBKV_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but cannot
    /// be parsed, and whatever [`Config::validate`] reports.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("EBBKV_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(kb) = env_parse::<u64>("EBBKV_MEMTABLE_KB")? {
            config.memtable_size = kb * 1024;
        }
        if let Some(sync) = env_parse::<bool>("EBBKV_WAL_SYNC")? {
            config.wal_sync = sync;
        }
        if let Some(n) = env_parse::<usize>("EBBKV_DELETIONS_THRESHOLD")? {
            config.deletions_rewrite_threshold = n;
        }
        if let Some(n) = env_parse::<usize>("EBBKV_DELETIONS_RATIO")? {
            config.deletions_ratio = n;
        }
        if let Some(n) = env_parse::<usize>("EBBKV_COMPACTORS")? {
            config.num_compactors = n;
        }
        if let Some(n) = env_parse::<usize>("EBBKV_L0_TRIGGER")? {
            config.num_level_zero_tables = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("work_dir must not be empty"));
        }
        if self.memtable_size == 0 {
            return Err(ConfigError::Invalid("memtable_size must be non-zero"));
        }
        Ok(())
    }

    /// Full path of the manifest file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(MANIFEST_FILENAME)
    }

    /// Full path of the WAL file for memtable `fid`.
    #[must_use]
    pub fn wal_path(&self, fid: u64) -> PathBuf {
        self.work_dir.join(wal_file_name(fid))
    }

    /// Full path of table `fid`.
    #[must_use]
    pub fn table_path(&self, fid: u64) -> PathBuf {
        self.work_dir.join(table_file_name(fid))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the working directory.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Set the memtable size threshold (in bytes).
    pub fn memtable_size(mut self, bytes: u64) -> Self {
        self.config.memtable_size = bytes;
        self
    }

    /// Enable or disable fsync after each WAL append.
    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.config.wal_sync = sync;
        self
    }

    /// Set the absolute manifest deletion count that allows a rewrite.
    pub fn deletions_rewrite_threshold(mut self, n: usize) -> Self {
        self.config.deletions_rewrite_threshold = n;
        self
    }

    /// Set the deletions-to-live-tables ratio that forces a rewrite.
    pub fn deletions_ratio(mut self, ratio: usize) -> Self {
        self.config.deletions_ratio = ratio;
        self
    }

    /// Set the number of background compaction workers.
    pub fn num_compactors(mut self, n: usize) -> Self {
        self.config.num_compactors = n;
        self
    }

    /// Set the L0 table count that triggers compaction (`0` disables).
    pub fn num_level_zero_tables(mut self, n: usize) -> Self {
        self.config.num_level_zero_tables = n;
        self
    }

    /// Set the idle poll period of compaction workers.
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// File naming
// =============================================================================

/// `"{fid:05}.wal"`
#[must_use]
pub fn wal_file_name(fid: u64) -> String {
    format!("{:05}{}", fid, WAL_FILE_EXT)
}

/// `"{fid:05}.sst"`
#[must_use]
pub fn table_file_name(fid: u64) -> String {
    format!("{:05}{}", fid, TABLE_FILE_EXT)
}

/// Parses the fid out of a WAL file name ("00042.wal" → `Some(42)`).
#[must_use]
pub fn parse_wal_fid(name: &str) -> Option<u64> {
    name.strip_suffix(WAL_FILE_EXT)?.parse().ok()
}

/// Parses the fid out of a table file name.
///
/// Returns `0` for anything that is not a table file; id 0 is never handed
/// out by the allocator, so it doubles as "not a table".
#[must_use]
pub fn parse_table_fid(name: &str) -> u64 {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    base.strip_suffix(TABLE_FILE_EXT)
        .and_then(|stem| stem.parse().ok())
        .unwrap_or(0)
}

/// Fsyncs a directory so that entries created, renamed or removed inside it
/// survive a crash.
pub fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}
