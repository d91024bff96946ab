//! Merge iterator over multiple [`TableReader`]s.
//!
//! Produces [`Entry`] values in ascending versioned-key order. Distinct
//! versions of a user key are all kept; only an identical versioned key seen
//! in more than one table is collapsed, and the table passed **first** (the
//! newer one) wins.
//!
//! This is the core primitive for compaction: walk N input tables in sorted
//! order and write the result to a new table.

use memtable::{Entry, VersionedKey};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{TableError, TableReader};

/// A pending key from one table, used for heap-based merge ordering.
///
/// The record itself is read lazily when the key reaches the top of the heap.
struct HeapEntry {
    key: VersionedKey,
    /// Index into the `readers` / `key_iters` arrays.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both comparisons so the smallest
        // key pops first and, on a tie, the lowest source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges multiple tables into a single sorted stream of entries.
///
/// `readers` must be ordered newest first. Anything that borrows as a
/// [`TableReader`] works, so shared `Arc<TableReader>` handles can be merged
/// without reopening files.
pub struct MergeIterator<'a, R = TableReader> {
    readers: &'a [R],
    /// Per-reader: sorted keys remaining to be yielded.
    key_iters: Vec<std::vec::IntoIter<VersionedKey>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a, R: Borrow<TableReader>> MergeIterator<'a, R> {
    /// Creates a new merge iterator over the given readers.
    ///
    /// Each reader's keys come from its in-memory index; the first key of
    /// each reader is pushed onto a min-heap.
    pub fn new(readers: &'a [R]) -> Self {
        let mut key_iters = Vec::with_capacity(readers.len());
        let mut heap = BinaryHeap::new();

        for (i, reader) in readers.iter().enumerate() {
            let keys: Vec<VersionedKey> = reader
                .borrow()
                .keys()
                .map(|k| VersionedKey(k.to_vec()))
                .collect();
            let mut iter = keys.into_iter();
            if let Some(first) = iter.next() {
                heap.push(HeapEntry {
                    key: first,
                    source: i,
                });
            }
            key_iters.push(iter);
        }

        Self {
            readers,
            key_iters,
            heap,
        }
    }

    fn advance(&mut self, source: usize) {
        if let Some(next) = self.key_iters[source].next() {
            self.heap.push(HeapEntry { key: next, source });
        }
    }

    /// Returns the next entry in sorted order, or `None` when every source is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Propagates read failures of the winning source, including CRC
    /// mismatches.
    pub fn next_entry(&mut self) -> Result<Option<Entry>, TableError> {
        loop {
            let top = match self.heap.pop() {
                Some(e) => e,
                None => return Ok(None),
            };
            self.advance(top.source);

            // Sources holding the same versioned key are older; drop them.
            while let Some(peek) = self.heap.peek() {
                if peek.key != top.key {
                    break;
                }
                let source = peek.source;
                self.heap.pop();
                self.advance(source);
            }

            match self.readers[top.source].borrow().get(top.key.as_bytes())? {
                Some(entry) => return Ok(Some(entry)),
                None => continue,
            }
        }
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<Entry>, TableError> {
        let mut result = Vec::new();
        while let Some(entry) = self.next_entry()? {
            result.push(entry);
        }
        Ok(result)
    }
}
