use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{check_key, compare_keys, Entry};
use std::cmp::Ordering;
use std::fs::{rename, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::format::{write_footer, Footer};
use crate::TableError;

/// Summary of a freshly written table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    /// Number of records in the table.
    pub entries: u64,
    /// CRC32 of the complete file, recorded in the manifest.
    pub checksum: u32,
}

/// Writer that tracks the byte offset and a running CRC32 of everything
/// passed through it.
struct ChecksumWriter<W: Write> {
    inner: W,
    offset: u64,
    hasher: Crc32,
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes sorted entries to disk as an immutable table file.
///
/// The writer is stateless; all work happens inside [`TableWriter::write`].
/// The write is crash-safe: data goes to a temporary file, is fsynced, and
/// is then atomically renamed to the final path.
pub struct TableWriter {}

impl TableWriter {
    /// Writes `entries` to a new table at `path`.
    ///
    /// `entries` must be in strictly ascending versioned-key order (the order
    /// a memtable index or a [`MergeIterator`](crate::MergeIterator) yields).
    ///
    /// # Crash Safety
    ///
    /// Writes to `path.sst.tmp`, calls `sync_all()`, renames over `path`,
    /// then fsyncs the parent directory. A crash mid-write leaves only the
    /// temporary file behind.
    ///
    /// # Errors
    ///
    /// [`TableError::Empty`] if `entries` yields nothing,
    /// [`TableError::Unsorted`] / [`TableError::InvalidKey`] on bad input, or
    /// any I/O failure. The temporary file is removed on error.
    pub fn write<I>(path: &Path, entries: I) -> Result<TableInfo, TableError>
    where
        I: IntoIterator<Item = Entry>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        match Self::write_tmp(&tmp_path, entries) {
            Ok(info) => {
                rename(&tmp_path, path)?;
                if let Some(parent) = path.parent() {
                    if let Ok(dir) = std::fs::File::open(parent) {
                        let _ = dir.sync_all();
                    }
                }
                Ok(info)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    fn write_tmp<I>(tmp_path: &Path, entries: I) -> Result<TableInfo, TableError>
    where
        I: IntoIterator<Item = Entry>,
    {
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut out = ChecksumWriter {
            inner: BufWriter::new(raw_file),
            offset: 0,
            hasher: Crc32::new(),
        };

        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        // DATA section
        for (position, entry) in entries.into_iter().enumerate() {
            if !check_key(&entry.key) {
                return Err(TableError::InvalidKey {
                    len: entry.key.len(),
                });
            }
            if let Some((prev, _)) = index.last() {
                if compare_keys(prev, &entry.key) != Ordering::Less {
                    return Err(TableError::Unsorted { position });
                }
            }

            record_buf.clear();
            record_buf.write_u8(entry.meta)?;
            record_buf.write_u32::<LittleEndian>(entry.key.len() as u32)?;
            record_buf.extend_from_slice(&entry.key);
            record_buf.write_u32::<LittleEndian>(entry.value.len() as u32)?;
            record_buf.extend_from_slice(&entry.value);

            let mut hasher = Crc32::new();
            hasher.update(&record_buf);

            let offset = out.offset;
            out.write_u32::<LittleEndian>(hasher.finalize())?;
            out.write_all(&record_buf)?;
            index.push((entry.key, offset));
        }

        if index.is_empty() {
            return Err(TableError::Empty);
        }

        // INDEX section
        let index_offset = out.offset;
        for (key, data_offset) in &index {
            out.write_u32::<LittleEndian>(key.len() as u32)?;
            out.write_all(key)?;
            out.write_u64::<LittleEndian>(*data_offset)?;
        }

        write_footer(
            &mut out,
            &Footer {
                entry_count: index.len() as u64,
                index_offset,
            },
        )?;

        out.flush()?;
        let checksum = out.hasher.finalize();
        out.inner.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        Ok(TableInfo {
            entries: index.len() as u64,
            checksum,
        })
    }
}
