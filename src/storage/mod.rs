//! Slot storage: bounded key→attributes tables with TTL classification.
//!
//! A [`SlotStorage`] classifies every looked-up key as fresh, expired, or
//! absent and materializes requested attributes for the first two. The
//! in-memory implementation lives in [`MemorySlotStorage`]; other layouts
//! (e.g. a block-oriented on-disk table) plug in through the same trait.

mod memory;

pub use memory::MemorySlotStorage;

use crate::columns::Column;
use crate::error::DictionaryError;
use crate::fetch::FetchRequest;
use crate::key::DictionaryKey;
use std::collections::HashMap;

/// Output of one bulk classification over a key list.
#[derive(Debug)]
pub struct LookupResult<K> {
    /// One row per found-or-expired slot, full schema width; only requested
    /// positions are populated.
    pub fetched_columns: Vec<Column>,
    /// Fresh keys → row in `fetched_columns`.
    pub found_index: HashMap<K, usize>,
    /// Expired keys → row in `fetched_columns`.
    pub expired_index: HashMap<K, usize>,
    /// Absent-or-expired keys, in input order. These are the keys a refresh
    /// must fetch.
    pub refresh_keys: Vec<K>,
    /// Positions of `refresh_keys` in the original input key list.
    pub refresh_rows: Vec<usize>,
}

impl<K> LookupResult<K> {
    pub fn found_count(&self) -> usize {
        self.found_index.len()
    }

    pub fn expired_count(&self) -> usize {
        self.expired_index.len()
    }
}

/// Bounded key→(attributes, deadline) table under a single-writer,
/// many-reader discipline.
///
/// Mutating entry points take `&mut self`; the dictionary serializes them
/// behind its reader-writer lock.
pub trait SlotStorage<K: DictionaryKey>: Send + Sync {
    /// Classifies `keys` at the current wall-clock time and materializes the
    /// requested attributes of every fresh or expired slot.
    fn lookup(&mut self, keys: &[K], request: &FetchRequest) -> LookupResult<K>;

    /// Writes or overwrites slots for `keys`, assigning each a fresh
    /// jittered deadline. `columns` must be full schema width and
    /// row-aligned with `keys`.
    fn insert(&mut self, keys: &[K], columns: &[Column]) -> Result<(), DictionaryError>;

    /// Snapshot of the currently cached keys.
    fn cached_keys(&self) -> Vec<K>;

    /// Number of occupied slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured slot capacity.
    fn capacity(&self) -> usize;

    /// Approximate bytes held by slot data.
    fn bytes(&self) -> usize;

    /// Whether `fetched_columns` rows come back in input-key order, letting
    /// the query pipeline skip its re-ordering pass.
    fn returns_in_key_order(&self) -> bool;
}
