use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{check_key, Entry, VersionedKey};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{read_footer, Footer, FOOTER_BYTES};
use crate::TableError;

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (64 MiB). Prevents OOM on corrupt files.
const MAX_VALUE_BYTES: usize = 64 * 1024 * 1024;

/// Reads a table file for point lookups and full scans.
///
/// On [`open`](TableReader::open) the whole file is checksummed and the
/// **index** is loaded into memory as a `BTreeMap<VersionedKey, u64>`
/// (key → data-section byte offset). A persistent file handle is kept for
/// the lifetime of the reader so `get` works through a shared `&self`.
pub struct TableReader {
    path: PathBuf,
    index: BTreeMap<VersionedKey, u64>,
    /// Persistent file handle; every read seeks before it touches the cursor.
    file: Mutex<BufReader<File>>,
    footer: Footer,
    checksum: u32,
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl TableReader {
    /// Opens a table file, verifies its structure and loads its index.
    ///
    /// # Errors
    ///
    /// [`TableError::Corrupt`] if the footer or index is damaged, or any I/O
    /// failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let corrupt = |reason: String| TableError::Corrupt {
            path: path.clone(),
            reason,
        };

        let mut f = File::open(&path)?;
        let checksum = file_checksum(&mut f)?;

        let footer = read_footer(&mut f).map_err(|e| corrupt(e.to_string()))?;
        let filesize = f.metadata()?.len();
        let index_end = filesize - FOOTER_BYTES;

        f.seek(SeekFrom::Start(footer.index_offset))?;
        let mut rdr = BufReader::new(&mut f);
        let mut pos = footer.index_offset;
        let mut index = BTreeMap::new();

        while pos < index_end {
            let key_len = rdr.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                return Err(corrupt(format!("index key_len {} exceeds maximum", key_len)));
            }
            let mut key = vec![0u8; key_len];
            rdr.read_exact(&mut key)?;
            if !check_key(&key) {
                return Err(corrupt(format!("index key of {} bytes has no version", key_len)));
            }
            let data_offset = rdr.read_u64::<LittleEndian>()?;
            if data_offset >= footer.index_offset {
                return Err(corrupt(format!("data offset {} inside index", data_offset)));
            }
            index.insert(VersionedKey(key), data_offset);
            pos += 4 + key_len as u64 + 8;
        }
        drop(rdr);

        if index.len() as u64 != footer.entry_count {
            return Err(corrupt(format!(
                "index holds {} keys, footer claims {}",
                index.len(),
                footer.entry_count
            )));
        }

        f.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path,
            index,
            file: Mutex::new(BufReader::new(f)),
            footer,
            checksum,
        })
    }

    /// Point lookup by exact versioned key.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, on a CRC mismatch, or if the on-disk
    /// key does not match the index (corruption).
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, TableError> {
        if !check_key(key) {
            return Ok(None);
        }
        let offset = match self.index.get(&VersionedKey(key.to_vec())) {
            Some(&o) => o,
            None => return Ok(None),
        };

        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;
        let entry = self.read_record(&mut *f, offset)?;

        if entry.key.as_slice() != key {
            return Err(TableError::Corrupt {
                path: self.path.clone(),
                reason: format!("index pointed to mismatching key at offset {}", offset),
            });
        }
        Ok(Some(entry))
    }

    /// Reads every record in ascending key order.
    ///
    /// Used by compaction to merge tables.
    pub fn entries(&self) -> Result<Vec<Entry>, TableError> {
        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(0))?;

        let mut out = Vec::with_capacity(self.index.len());
        let mut offset = 0u64;
        while offset < self.footer.index_offset {
            let entry = self.read_record(&mut *f, offset)?;
            offset += record_len(&entry);
            out.push(entry);
        }
        Ok(out)
    }

    /// Reads one `[crc][meta][key_len][key][val_len][value]` record at the
    /// reader's current position (which must be `offset`).
    fn read_record<R: Read>(&self, r: &mut R, offset: u64) -> Result<Entry, TableError> {
        let expected = r.read_u32::<LittleEndian>()?;
        let meta = r.read_u8()?;
        let key_len = r.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(TableError::Corrupt {
                path: self.path.clone(),
                reason: format!("key_len {} exceeds maximum at offset {}", key_len, offset),
            });
        }
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;
        let val_len = r.read_u32::<LittleEndian>()? as usize;
        if val_len > MAX_VALUE_BYTES {
            return Err(TableError::Corrupt {
                path: self.path.clone(),
                reason: format!("val_len {} exceeds maximum at offset {}", val_len, offset),
            });
        }
        let mut value = vec![0u8; val_len];
        r.read_exact(&mut value)?;

        let mut hasher = Crc32::new();
        hasher.update(&[meta]);
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&key);
        hasher.update(&(val_len as u32).to_le_bytes());
        hasher.update(&value);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(TableError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        Ok(Entry { key, value, meta })
    }

    /// CRC32 of the complete file, as computed at open time.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of entries in the in-memory index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the table contains zero entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys in ascending versioned order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(|k| k.as_bytes())
    }
}

fn record_len(entry: &Entry) -> u64 {
    4 + 1 + 4 + entry.key.len() as u64 + 4 + entry.value.len() as u64
}

fn file_checksum(f: &mut File) -> Result<u32, TableError> {
    f.seek(SeekFrom::Start(0))?;
    let mut hasher = Crc32::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
