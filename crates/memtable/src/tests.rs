use super::*;
use std::cmp::Ordering;

fn entry(user: &[u8], ts: u64, value: &[u8]) -> Entry {
    Entry::new(key_with_ts(user, ts), value.to_vec())
}

// -------------------- Key ordering --------------------

#[test]
fn user_key_compared_before_version() {
    // Plain byte comparison would put "aa" before "a" + high version bytes.
    let a = key_with_ts(b"a", u64::MAX);
    let aa = key_with_ts(b"aa", 0);
    assert_eq!(compare_keys(&a, &aa), Ordering::Less);
    assert_eq!(compare_keys(&aa, &a), Ordering::Greater);
}

#[test]
fn same_user_key_orders_by_version() {
    let v1 = key_with_ts(b"k", 1);
    let v2 = key_with_ts(b"k", 2);
    assert_eq!(compare_keys(&v1, &v2), Ordering::Less);
    assert_eq!(compare_keys(&v2, &v2), Ordering::Equal);
}

#[test]
#[should_panic]
fn compare_rejects_short_keys() {
    compare_keys(b"12345678", &key_with_ts(b"k", 1));
}

#[test]
fn ts_helpers_roundtrip() {
    let k = key_with_ts(b"user", 0x0102_0304_0506_0708);
    assert_eq!(parse_ts(&k), 0x0102_0304_0506_0708);
    assert_eq!(parse_key(&k), b"user");
    assert!(check_key(&k));
    assert!(!check_key(b"short"));
    assert_eq!(parse_ts(b"short"), 0);
}

// -------------------- SortedIndex --------------------

#[test]
fn insert_and_search_exact_key() {
    let mut idx = SortedIndex::new();
    idx.insert(entry(b"k", 1, b"v1")).unwrap();
    idx.insert(entry(b"k", 2, b"v2")).unwrap();

    assert_eq!(idx.len(), 2);
    assert_eq!(idx.search(&key_with_ts(b"k", 1)).unwrap().value, b"v1");
    assert_eq!(idx.search(&key_with_ts(b"k", 2)).unwrap().value, b"v2");
    assert!(idx.search(&key_with_ts(b"k", 3)).is_none());
}

#[test]
fn reinsert_same_versioned_key_replaces() {
    let mut idx = SortedIndex::new();
    idx.insert(entry(b"k", 1, b"first")).unwrap();
    idx.insert(entry(b"k", 1, b"second")).unwrap();
    assert_eq!(idx.len(), 1);
    assert_eq!(idx.search(&key_with_ts(b"k", 1)).unwrap().value, b"second");
}

#[test]
fn insert_rejects_unversioned_key() {
    let mut idx = SortedIndex::new();
    let err = idx.insert(Entry::new(b"k".to_vec(), b"v".to_vec())).unwrap_err();
    assert_eq!(err, IndexError::InvalidKey { len: 1 });
    assert!(idx.is_empty());
}

#[test]
fn search_short_key_is_none() {
    let mut idx = SortedIndex::new();
    idx.insert(entry(b"k", 1, b"v")).unwrap();
    assert!(idx.search(b"k").is_none());
}

#[test]
fn iter_follows_versioned_order() {
    let mut idx = SortedIndex::new();
    idx.insert(entry(b"aa", 0, b"3")).unwrap();
    idx.insert(entry(b"a", 9, b"2")).unwrap();
    idx.insert(entry(b"a", 1, b"1")).unwrap();

    let values: Vec<Vec<u8>> = idx.iter().map(|e| e.value.clone()).collect();
    assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
}

#[test]
fn approx_size_tracks_replacements() {
    let mut idx = SortedIndex::new();
    let e = entry(b"k", 1, b"aaaa");
    let first = e.approx_size();
    idx.insert(e).unwrap();
    assert_eq!(idx.approx_size(), first);

    let e2 = entry(b"k", 1, b"b");
    let second = e2.approx_size();
    idx.insert(e2).unwrap();
    assert_eq!(idx.approx_size(), second);
}

#[test]
fn close_releases_entries() {
    let mut idx = SortedIndex::new();
    idx.insert(entry(b"k", 1, b"v")).unwrap();
    idx.close();
    assert!(idx.is_empty());
    assert_eq!(idx.approx_size(), 0);
}

#[test]
fn entry_version_and_meta() {
    let e = entry(b"k", 77, b"v").with_meta(3);
    assert_eq!(e.version(), 77);
    assert_eq!(e.meta, 3);
}
