
use memtable::{key_with_ts, Entry};

/// Builds an entry for `user_key` at version `ts`.
pub(super) fn entry(user_key: &[u8], ts: u64, value: &[u8]) -> Entry {
    Entry::new(key_with_ts(user_key, ts), value.to_vec())
}
