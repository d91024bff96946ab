//! Versioned key helpers.
//!
//! Every key handled by the engine ends in an 8-byte big-endian version
//! (timestamp). Ordering compares the user key first and breaks ties on the
//! version bytes, so `a@2` sorts before `aa@1` even though plain byte
//! comparison would say otherwise.

use std::cmp::Ordering;

/// Width of the version suffix carried by every key.
pub const VERSION_BYTES: usize = 8;

/// Compares two versioned keys: user key first, then version.
///
/// # Panics
///
/// Panics if either key is 8 bytes or shorter. Callers validate keys with
/// [`check_key`] before they reach an ordered structure.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    assert!(
        a.len() > VERSION_BYTES && b.len() > VERSION_BYTES,
        "versioned keys must be longer than {} bytes (got {} and {})",
        VERSION_BYTES,
        a.len(),
        b.len()
    );
    let (ua, va) = a.split_at(a.len() - VERSION_BYTES);
    let (ub, vb) = b.split_at(b.len() - VERSION_BYTES);
    ua.cmp(ub).then_with(|| va.cmp(vb))
}

/// Returns `true` if `key` carries at least one user byte plus a version.
#[must_use]
pub fn check_key(key: &[u8]) -> bool {
    key.len() > VERSION_BYTES
}

/// Appends the big-endian `ts` to `user_key`.
#[must_use]
pub fn key_with_ts(user_key: &[u8], ts: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + VERSION_BYTES);
    out.extend_from_slice(user_key);
    out.extend_from_slice(&ts.to_be_bytes());
    out
}

/// Reads the version suffix. Keys too short to carry one yield `0`.
#[must_use]
pub fn parse_ts(key: &[u8]) -> u64 {
    if key.len() <= VERSION_BYTES {
        return 0;
    }
    let mut buf = [0u8; VERSION_BYTES];
    buf.copy_from_slice(&key[key.len() - VERSION_BYTES..]);
    u64::from_be_bytes(buf)
}

/// Strips the version suffix, returning the user key.
#[must_use]
pub fn parse_key(key: &[u8]) -> &[u8] {
    if key.len() <= VERSION_BYTES {
        return key;
    }
    &key[..key.len() - VERSION_BYTES]
}

/// Owned key ordered by [`compare_keys`].
///
/// Only construct this from keys that pass [`check_key`]; ordering a short
/// key panics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey(pub Vec<u8>);

impl VersionedKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        parse_ts(&self.0)
    }
}

impl Ord for VersionedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0)
    }
}

impl PartialOrd for VersionedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
