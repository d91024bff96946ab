//! # Manifest - Table Level Log
//!
//! Tracks which table files exist and at which level, so that the engine can
//! rebuild its level layout after a restart.
//!
//! ## File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ magic text "WIN!" (4 B) | version u32 BE (4 B) │
//! ├──────────────────────────────────────────────┤
//! │ len u32 BE | crc32c u32 BE | ChangeSet (len B) │  frame 1
//! ├──────────────────────────────────────────────┤
//! │ ...                                          │  frame N
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The CRC (Castagnoli) covers the ChangeSet payload only.
//!
//! ## Crash Safety
//!
//! Frames are appended and fsynced before [`ManifestFile::add_changes`]
//! returns. A crash mid-append leaves a torn last frame, which replay ignores
//! and open truncates away. A rewrite builds the compacted log in
//! `REWRITEMANIFEST`, fsyncs it, renames it over `MANIFEST` and fsyncs the
//! directory, so a crash leaves either the old or the new log, never a mix.
//!
//! ## Known gap
//!
//! `add_changes` applies a change set to the in-memory manifest before the
//! frame reaches disk. If the write then fails, memory and disk disagree
//! until the next open replays the file.

use byteorder::{BigEndian, ReadBytesExt};
use config::{
    parse_table_fid, sync_dir, table_file_name, Config, MANIFEST_FILENAME,
    MANIFEST_REWRITE_FILENAME,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::change::{Change, ChangeSet, Operation};
use crate::error::{Corruption, EngineError, Result};

/// First four header bytes of every manifest.
pub const MAGIC_TEXT: [u8; 4] = *b"WIN!";

/// Format version stored after [`MAGIC_TEXT`].
pub const MAGIC_VERSION: u32 = 1;

const HEADER_BYTES: u64 = 8;
const FRAME_PREFIX_BYTES: usize = 8;

/// Placement of one tracked table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableManifest {
    pub level: u8,
    pub checksum: Vec<u8>,
}

/// Identity of a freshly written table, as handed to
/// [`ManifestFile::add_table_meta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub id: u64,
    pub checksum: Vec<u8>,
}

/// In-memory view of the manifest log.
///
/// Every id in `tables` sits in exactly one `levels[level]` set, matching
/// its recorded level, and `creations - deletions == tables.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub levels: Vec<HashSet<u64>>,
    pub tables: HashMap<u64, TableManifest>,
    pub creations: usize,
    pub deletions: usize,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a single change.
    ///
    /// # Errors
    ///
    /// [`EngineError::StructuralCorruption`] for a duplicate CREATE, a DELETE
    /// of an untracked id, or an unknown operation.
    pub fn apply_change(&mut self, change: &Change) -> Result<()> {
        match change.op {
            Operation::Create => {
                if self.tables.contains_key(&change.id) {
                    return Err(Corruption::DuplicateCreate { id: change.id }.into());
                }
                self.tables.insert(
                    change.id,
                    TableManifest {
                        level: change.level,
                        checksum: change.checksum.clone(),
                    },
                );
                let level = change.level as usize;
                if self.levels.len() <= level {
                    self.levels.resize_with(level + 1, HashSet::new);
                }
                self.levels[level].insert(change.id);
                self.creations += 1;
            }
            Operation::Delete => {
                let tm = self
                    .tables
                    .remove(&change.id)
                    .ok_or(Corruption::DeleteOfMissing { id: change.id })?;
                if let Some(level) = self.levels.get_mut(tm.level as usize) {
                    level.remove(&change.id);
                }
                self.deletions += 1;
            }
            Operation::Unknown(tag) => {
                return Err(Corruption::UnknownOperation { tag }.into());
            }
        }
        Ok(())
    }

    /// Applies every change in order. A failure part-way leaves the manifest
    /// partially mutated; callers treat that as fatal.
    pub fn apply_change_set(&mut self, set: &ChangeSet) -> Result<()> {
        for change in &set.changes {
            self.apply_change(change)?;
        }
        Ok(())
    }

    /// A CREATE-only change set that rebuilds this manifest from scratch.
    ///
    /// Ordered by id so that rewrites are byte-for-byte deterministic.
    pub fn as_changes(&self) -> ChangeSet {
        let mut ids: Vec<&u64> = self.tables.keys().collect();
        ids.sort_unstable();
        ChangeSet::new(
            ids.into_iter()
                .map(|id| {
                    let tm = &self.tables[id];
                    Change::create(*id, tm.level, tm.checksum.clone())
                })
                .collect(),
        )
    }

    /// Ids tracked at `level`, ascending.
    pub fn level_ids(&self, level: usize) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .levels
            .get(level)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.tables.contains_key(&id)
    }

    /// Number of tracked tables.
    #[must_use]
    pub fn live_tables(&self) -> usize {
        self.tables.len()
    }
}

struct Inner {
    file: File,
    manifest: Manifest,
}

/// The manifest log on disk plus its in-memory [`Manifest`].
///
/// One mutex guards the file handle and the manifest together, so an
/// apply, its append and any rewrite it triggers are one critical section.
pub struct ManifestFile {
    dir: PathBuf,
    deletions_rewrite_threshold: usize,
    deletions_ratio: usize,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ManifestFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ManifestFile")
            .field("dir", &self.dir)
            .field("tables", &inner.manifest.tables.len())
            .field("creations", &inner.manifest.creations)
            .field("deletions", &inner.manifest.deletions)
            .finish()
    }
}

impl ManifestFile {
    /// Opens `work_dir/MANIFEST`, creating it if absent.
    ///
    /// An existing file is replayed and then truncated to the end of its last
    /// complete frame. A missing file is bootstrapped by a rewrite of the
    /// empty manifest.
    ///
    /// # Errors
    ///
    /// [`EngineError::BadMagic`], [`EngineError::UnsupportedManifestVersion`],
    /// [`EngineError::ChecksumMismatch`] and structural corruption are fatal
    /// and returned as-is, as are I/O failures.
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config.work_dir.clone();
        let path = dir.join(MANIFEST_FILENAME);

        let (file, manifest) = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(mut file) => {
                let file_len = file.metadata()?.len();
                let (manifest, valid_end) = replay(BufReader::new(&mut file))?;
                file.set_len(valid_end)?;
                file.seek(SeekFrom::End(0))?;
                info!(
                    path = %path.display(),
                    tables = manifest.tables.len(),
                    creations = manifest.creations,
                    deletions = manifest.deletions,
                    truncated = file_len - valid_end,
                    "manifest replayed"
                );
                (file, manifest)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let manifest = Manifest::new();
                let file = write_rewrite(&dir, &manifest)?;
                info!(path = %path.display(), "manifest created");
                (file, manifest)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            dir,
            deletions_rewrite_threshold: config.deletions_rewrite_threshold,
            deletions_ratio: config.deletions_ratio,
            inner: Mutex::new(Inner { file, manifest }),
        })
    }

    /// Applies `changes` and makes them durable, either as one appended frame
    /// or, when deletions dominate, by rewriting the whole log.
    ///
    /// # Errors
    ///
    /// Structural corruption if the changes contradict the manifest (the
    /// in-memory state may then be partially mutated), or I/O failures.
    pub fn add_changes(&self, changes: Vec<Change>) -> Result<()> {
        let set = ChangeSet::new(changes);
        let mut payload = Vec::new();
        set.encode(&mut payload)?;

        let mut inner = self.inner.lock();
        inner.manifest.apply_change_set(&set)?;

        let m = &inner.manifest;
        let live = m.creations.saturating_sub(m.deletions);
        if m.deletions > self.deletions_rewrite_threshold
            && m.deletions > self.deletions_ratio.saturating_mul(live)
        {
            self.rewrite_locked(&mut *inner)?;
        } else {
            let frame = encode_frame(&payload);
            inner.file.write_all(&frame)?;
            debug!(changes = set.len(), bytes = frame.len(), "manifest frame appended");
        }
        inner.file.sync_all()?;
        Ok(())
    }

    /// Records a new table at `level`.
    pub fn add_table_meta(&self, level: u8, meta: &TableMeta) -> Result<()> {
        self.add_changes(vec![Change::create(meta.id, level, meta.checksum.clone())])
    }

    /// Compacts the log down to one CREATE frame per live table.
    ///
    /// The logical manifest is unchanged; `creations` becomes the live count
    /// and `deletions` drops to zero.
    pub fn rewrite(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.rewrite_locked(&mut *inner)
    }

    fn rewrite_locked(&self, inner: &mut Inner) -> Result<()> {
        // The old handle stays valid until the new file has been renamed in.
        let file = write_rewrite(&self.dir, &inner.manifest)?;
        inner.file = file;
        inner.manifest.creations = inner.manifest.tables.len();
        inner.manifest.deletions = 0;
        info!(tables = inner.manifest.tables.len(), "manifest rewritten");
        Ok(())
    }

    /// Reconciles the manifest with the table ids found on disk.
    ///
    /// # Errors
    ///
    /// [`EngineError::TableMissing`] if a tracked table is absent. Untracked
    /// tables are deleted with a warning.
    pub fn revert_to_manifest(&self, on_disk: &HashSet<u64>) -> Result<()> {
        let inner = self.inner.lock();

        let mut tracked: Vec<u64> = inner.manifest.tables.keys().copied().collect();
        tracked.sort_unstable();
        if let Some(&id) = tracked.iter().find(|id| !on_disk.contains(id)) {
            return Err(EngineError::TableMissing { id });
        }

        for &id in on_disk {
            if !inner.manifest.tables.contains_key(&id) {
                let path = self.dir.join(table_file_name(id));
                warn!(id, path = %path.display(), "table not referenced in manifest, removing");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Snapshot of the current manifest.
    pub fn manifest(&self) -> Manifest {
        self.inner.lock().manifest.clone()
    }

    /// Syncs the log. The handle itself is released on drop.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

/// Replays a manifest stream from its first byte.
///
/// Returns the manifest and the offset just past the last complete frame.
/// End of input inside a frame prefix or payload ends replay without error.
pub fn replay<R: Read>(mut reader: R) -> Result<(Manifest, u64)> {
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic) {
        Ok(()) if magic == MAGIC_TEXT => {}
        Ok(()) => return Err(EngineError::BadMagic),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(EngineError::BadMagic),
        Err(e) => return Err(e.into()),
    }
    let version = match reader.read_u32::<BigEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(EngineError::BadMagic),
        Err(e) => return Err(e.into()),
    };
    if version != MAGIC_VERSION {
        return Err(EngineError::UnsupportedManifestVersion {
            found: version,
            expected: MAGIC_VERSION,
        });
    }

    let mut manifest = Manifest::new();
    let mut offset = HEADER_BYTES;

    loop {
        let len = match reader.read_u32::<BigEndian>() {
            Ok(v) => u64::from(v),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let expected = match reader.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let mut payload = Vec::new();
        (&mut reader).take(len).read_to_end(&mut payload)?;
        if (payload.len() as u64) < len {
            debug!(offset, len, got = payload.len(), "torn manifest frame at end of file");
            break;
        }

        let actual = crc32c::crc32c(&payload);
        if actual != expected {
            return Err(EngineError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let set = ChangeSet::decode(&payload)?;
        manifest.apply_change_set(&set)?;
        offset += FRAME_PREFIX_BYTES as u64 + len;
    }

    Ok((manifest, offset))
}

/// Collects the ids of every table file in `dir`.
pub fn load_table_ids(dir: &Path) -> Result<HashSet<u64>> {
    let mut ids = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            let id = parse_table_fid(name);
            if id != 0 {
                ids.insert(id);
            }
        }
    }
    Ok(ids)
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32c::crc32c(payload).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Writes `manifest` as a fresh log under the rewrite name, renames it over
/// `MANIFEST` and returns the reopened canonical file positioned at its end.
fn write_rewrite(dir: &Path, manifest: &Manifest) -> Result<File> {
    let tmp_path = dir.join(MANIFEST_REWRITE_FILENAME);
    let path = dir.join(MANIFEST_FILENAME);

    let mut payload = Vec::new();
    manifest.as_changes().encode(&mut payload)?;

    let mut buf = Vec::with_capacity(HEADER_BYTES as usize + FRAME_PREFIX_BYTES + payload.len());
    buf.extend_from_slice(&MAGIC_TEXT);
    buf.extend_from_slice(&MAGIC_VERSION.to_be_bytes());
    buf.extend_from_slice(&encode_frame(&payload));

    {
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
    }

    fs::rename(&tmp_path, &path)?;
    sync_dir(dir)?;

    let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
    file.seek(SeekFrom::End(0))?;
    Ok(file)
}
