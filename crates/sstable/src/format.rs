//! Table binary format constants and footer read/write helpers.
//!
//! ```text
//! [entry_count: u64 LE][index_offset: u64 LE][magic: u32 LE]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Magic number identifying table files (ASCII "EBT1").
pub const TABLE_MAGIC: u32 = 0x4542_5431;

/// Size of the footer in bytes: 8 (`entry_count`) + 8 (`index_offset`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 4;

/// Parsed table footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u64,
    pub index_offset: u64,
}

/// Writes the footer to `w`.
pub fn write_footer<W: Write>(w: &mut W, footer: &Footer) -> io::Result<()> {
    w.write_u64::<LittleEndian>(footer.entry_count)?;
    w.write_u64::<LittleEndian>(footer.index_offset)?;
    w.write_u32::<LittleEndian>(TABLE_MAGIC)?;
    Ok(())
}

/// Reads and validates the footer at the end of `r`.
///
/// After this call the cursor is at the end of the file.
pub fn read_footer<R: Read + Seek>(r: &mut R) -> io::Result<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for table footer",
        ));
    }

    r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
    let entry_count = r.read_u64::<LittleEndian>()?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != TABLE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown table magic: {:#x}", magic),
        ));
    }
    if index_offset > filesize - FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "index_offset points past the footer",
        ));
    }

    Ok(Footer {
        entry_count,
        index_offset,
    })
}
