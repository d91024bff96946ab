//! Manifest change records and their binary encoding.
//!
//! A [`ChangeSet`] is the payload of one manifest frame:
//!
//! ```text
//! [count: u32 BE]
//! count × [id: u64 BE][op: u8][level: u8][checksum_len: u32 BE][checksum]
//! ```
//!
//! `op` is `0` for CREATE and `1` for DELETE. Decoding keeps the raw tag so
//! that an unknown operation is reported by the manifest as structural
//! corruption rather than as a decode failure.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::{EngineError, Result};

const OP_CREATE: u8 = 0;
const OP_DELETE: u8 = 1;

/// What a [`Change`] does to the table it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
    /// A tag this build does not understand.
    Unknown(u8),
}

impl Operation {
    fn tag(self) -> u8 {
        match self {
            Operation::Create => OP_CREATE,
            Operation::Delete => OP_DELETE,
            Operation::Unknown(tag) => tag,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            OP_CREATE => Operation::Create,
            OP_DELETE => Operation::Delete,
            other => Operation::Unknown(other),
        }
    }
}

/// One table creation or deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: u64,
    pub op: Operation,
    pub level: u8,
    pub checksum: Vec<u8>,
}

impl Change {
    pub fn create(id: u64, level: u8, checksum: Vec<u8>) -> Self {
        Self {
            id,
            op: Operation::Create,
            level,
            checksum,
        }
    }

    /// Deletions carry no level or checksum; the manifest looks both up.
    pub fn delete(id: u64) -> Self {
        Self {
            id,
            op: Operation::Delete,
            level: 0,
            checksum: Vec::new(),
        }
    }
}

/// An ordered batch of changes committed as one manifest frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Serializes the set into `buf` (appending).
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<BigEndian>(self.changes.len() as u32)?;
        for c in &self.changes {
            buf.write_u64::<BigEndian>(c.id)?;
            buf.write_u8(c.op.tag())?;
            buf.write_u8(c.level)?;
            buf.write_u32::<BigEndian>(c.checksum.len() as u32)?;
            buf.extend_from_slice(&c.checksum);
        }
        Ok(())
    }

    /// Parses a payload produced by [`encode`](ChangeSet::encode).
    ///
    /// # Errors
    ///
    /// [`EngineError::Decode`] if the payload is short or has trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(payload);
        let count = cur.read_u32::<BigEndian>().map_err(short)?;

        // Each change needs at least 14 bytes, which bounds the allocation.
        let remaining = payload.len().saturating_sub(4);
        if count as usize > remaining / 14 {
            return Err(EngineError::Decode {
                reason: format!("{} changes cannot fit in {} bytes", count, remaining),
            });
        }

        let mut changes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = cur.read_u64::<BigEndian>().map_err(short)?;
            let op = Operation::from_tag(cur.read_u8().map_err(short)?);
            let level = cur.read_u8().map_err(short)?;
            let checksum_len = cur.read_u32::<BigEndian>().map_err(short)? as usize;
            let left = payload.len() - cur.position() as usize;
            if checksum_len > left {
                return Err(EngineError::Decode {
                    reason: format!("checksum of {} bytes overruns payload", checksum_len),
                });
            }
            let mut checksum = vec![0u8; checksum_len];
            cur.read_exact(&mut checksum).map_err(short)?;
            changes.push(Change {
                id,
                op,
                level,
                checksum,
            });
        }

        if (cur.position() as usize) != payload.len() {
            return Err(EngineError::Decode {
                reason: format!(
                    "{} trailing bytes",
                    payload.len() - cur.position() as usize
                ),
            });
        }
        Ok(Self { changes })
    }
}

fn short(_: std::io::Error) -> EngineError {
    EngineError::Decode {
        reason: "payload ends mid-change".to_string(),
    }
}
