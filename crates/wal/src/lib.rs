//! # WAL - Write-Ahead Log
//!
//! Per-memtable durability log for the EbbKV storage engine.
//!
//! Every entry is serialized into a binary frame and appended to the
//! memtable's WAL file **before** it is inserted into the in-memory index.
//! On restart each WAL file is iterated to rebuild its memtable, then
//! truncated to the end of the last valid frame.
//!
//! ## Binary Frame Format
//!
//! ```text
//! [body_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[meta: u8][key_len: u32][key][val_len: u32][value]`
//!
//! `body_len` counts the body only. The CRC32 covers the body.
//!
//! ## Tail tolerance
//!
//! A crash can leave a partially written frame at the end of the file.
//! [`WalFile::iterate`] stops at the first frame whose prefix or body runs
//! past end of file, or whose length is zero or oversized, and reports the
//! offset just past the last good frame. Everything before that offset is
//! replayed; the caller truncates the rest.
//!
//! A frame that is fully present but fails its checksum is not a torn
//! write. It is reported as [`WalError::ChecksumMismatch`] and the file is
//! left alone, since the frames after it may still be valid.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalFile, WalRecord};
//!
//! let mut w = WalFile::open("00001.wal", 1, true).unwrap();
//! w.append(&WalRecord::new(b"hello\0\0\0\0\0\0\0\x01".to_vec(), b"world".to_vec(), 0)).unwrap();
//! let end = w
//!     .iterate(0, |rec| -> Result<(), std::convert::Infallible> {
//!         println!("{:?}", rec);
//!         Ok(())
//!     })
//!     .unwrap();
//! w.truncate(end).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Size of the `[body_len][crc32]` frame prefix.
pub const FRAME_HEADER_BYTES: u64 = 8;

/// Frames larger than this are treated as garbage rather than allocated.
const MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// A single WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub meta: u8,
}

impl WalRecord {
    pub fn new(key: Vec<u8>, value: Vec<u8>, meta: u8) -> Self {
        Self { key, value, meta }
    }

    /// Exact on-disk size of this record's frame.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        estimate_encoded_size(self.key.len(), self.value.len())
    }
}

/// On-disk size of a frame holding a key and value of the given lengths.
///
/// The engine uses this to decide whether an incoming write still fits in
/// the active memtable.
#[must_use]
pub fn estimate_encoded_size(key_len: usize, value_len: usize) -> u64 {
    FRAME_HEADER_BYTES + 1 + 4 + key_len as u64 + 4 + value_len as u64
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A fully present frame whose body does not match its CRC.
    #[error("wal checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A frame passed its checksum but its body does not parse.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },

    /// The replay callback refused a record.
    #[error("record at offset {offset} rejected: {reason}")]
    Rejected { offset: u64, reason: String },

    /// The record cannot be framed (body exceeds the u32 length field).
    #[error("record too large: {0} bytes")]
    TooLarge(usize),
}

/// An open WAL file bound to one memtable.
///
/// Appends always go to the logical end of the file (tracked in `size`), so
/// iterating does not disturb where the next frame lands.
pub struct WalFile {
    file: File,
    path: PathBuf,
    fid: u64,
    size: u64,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl std::fmt::Debug for WalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalFile")
            .field("path", &self.path)
            .field("fid", &self.fid)
            .field("size", &self.size)
            .field("sync", &self.sync)
            .finish()
    }
}

impl WalFile {
    /// Opens (or creates) the WAL file at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `fid` - the file id encoded in the file name.
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    pub fn open<P: AsRef<Path>>(path: P, fid: u64, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path,
            fid,
            size,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it as one frame.
    ///
    /// The frame is built in memory and written with a single `write_all`.
    /// With `sync` enabled the call returns only after `fsync`.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.buf.clear();
        encode_frame(&mut self.buf, record)?;

        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        self.size += self.buf.len() as u64;
        Ok(())
    }

    /// Replays every valid frame starting at `from`, calling `apply` for each.
    ///
    /// Returns the offset just past the last valid frame. A truncated or
    /// zeroed tail ends the replay without an error.
    ///
    /// # Errors
    ///
    /// - [`WalError::ChecksumMismatch`] for a complete frame with a bad CRC.
    /// - [`WalError::Rejected`] if `apply` fails (replay stops there).
    /// - [`WalError::Corrupt`] if a checksummed body is malformed.
    /// - [`WalError::Io`] on read failures other than end-of-file.
    pub fn iterate<F, E>(&mut self, from: u64, apply: F) -> Result<u64, WalError>
    where
        F: FnMut(WalRecord) -> Result<(), E>,
        E: Display,
    {
        self.file.seek(SeekFrom::Start(from))?;
        let end = iterate_frames(BufReader::new(&self.file), from, apply)?;
        if end < self.size {
            warn!(
                path = %self.path.display(),
                valid_end = end,
                file_size = self.size,
                "wal has an invalid tail"
            );
        }
        Ok(end)
    }

    /// Cuts the file to `offset` bytes and syncs the new length.
    pub fn truncate(&mut self, offset: u64) -> Result<(), WalError> {
        if offset != self.size {
            debug!(path = %self.path.display(), from = self.size, to = offset, "truncating wal");
        }
        self.file.set_len(offset)?;
        self.file.sync_all()?;
        self.size = offset;
        Ok(())
    }

    /// Forces all written data to disk via `sync_all()`.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Logical size of the log in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn fid(&self) -> u64 {
        self.fid
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs and closes the file.
    pub fn close(mut self) -> Result<(), WalError> {
        self.sync()
    }
}

/// Appends one complete frame for `record` to `buf`.
fn encode_frame(buf: &mut Vec<u8>, record: &WalRecord) -> Result<(), WalError> {
    let start = buf.len();

    // Reserve 8 bytes for the frame header (body_len + crc), filled later
    buf.extend_from_slice(&[0u8; 8]);
    buf.write_u8(record.meta)?;
    buf.write_u32::<LittleEndian>(record.key.len() as u32)?;
    buf.extend_from_slice(&record.key);
    buf.write_u32::<LittleEndian>(record.value.len() as u32)?;
    buf.extend_from_slice(&record.value);

    let body_len = buf.len() - start - FRAME_HEADER_BYTES as usize;
    if body_len > MAX_BODY_SIZE as usize {
        buf.truncate(start);
        return Err(WalError::TooLarge(body_len));
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf[start + 8..]);
    let crc = hasher.finalize();

    buf[start..start + 4].copy_from_slice(&(body_len as u32).to_le_bytes());
    buf[start + 4..start + 8].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Replays frames from any reader positioned at logical offset `start`.
///
/// This is the engine behind [`WalFile::iterate`]; it is public so that
/// in-memory buffers can be replayed in tests.
pub fn iterate_frames<R, F, E>(reader: R, start: u64, mut apply: F) -> Result<u64, WalError>
where
    R: Read,
    F: FnMut(WalRecord) -> Result<(), E>,
    E: Display,
{
    let mut rdr = reader;
    let mut valid_end = start;
    let mut body = Vec::with_capacity(256);

    loop {
        let body_len = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(valid_end),
            Err(e) => return Err(WalError::Io(e)),
        };

        // A zero length is a preallocated or zeroed tail. An absurd one cannot
        // be read back as a complete frame, so it is treated the same way.
        if body_len == 0 || body_len > MAX_BODY_SIZE {
            return Ok(valid_end);
        }

        let crc = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(valid_end),
            Err(e) => return Err(WalError::Io(e)),
        };

        body.clear();
        body.resize(body_len as usize, 0);
        match rdr.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(valid_end),
            Err(e) => return Err(WalError::Io(e)),
        }

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let actual = hasher.finalize();
        if actual != crc {
            return Err(WalError::ChecksumMismatch {
                offset: valid_end,
                expected: crc,
                actual,
            });
        }

        let record = decode_body(&body).ok_or(WalError::Corrupt { offset: valid_end })?;
        apply(record).map_err(|e| WalError::Rejected {
            offset: valid_end,
            reason: e.to_string(),
        })?;

        valid_end += FRAME_HEADER_BYTES + u64::from(body_len);
    }
}

fn decode_body(body: &[u8]) -> Option<WalRecord> {
    let mut br = body;
    let meta = br.read_u8().ok()?;
    let key_len = br.read_u32::<LittleEndian>().ok()? as usize;
    if key_len > br.len() {
        return None;
    }
    let (key, rest) = br.split_at(key_len);
    br = rest;
    let val_len = br.read_u32::<LittleEndian>().ok()? as usize;
    if val_len != br.len() {
        return None;
    }
    Some(WalRecord {
        key: key.to_vec(),
        value: br.to_vec(),
        meta,
    })
}
