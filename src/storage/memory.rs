//! In-memory slot storage with TTL classification and deadline eviction.

use super::{LookupResult, SlotStorage};
use crate::columns::{Column, Value};
use crate::config::StorageSettings;
use crate::error::DictionaryError;
use crate::fetch::FetchRequest;
use crate::key::DictionaryKey;
use crate::schema::Schema;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// One cached row: all attribute values plus the absolute expiry deadline.
///
/// The deadline already includes the per-slot jitter drawn at write time, so
/// classification is a plain comparison.
#[derive(Debug, Clone)]
struct Slot {
    values: Box<[Value]>,
    deadline: SystemTime,
}

enum SlotState {
    Fresh,
    Expired,
    Absent,
}

/// Bounded in-memory slot table.
///
/// Capacity is a strict upper bound: when a bulk insert pushes the table
/// over `size_in_cells`, slots with the earliest deadlines are displaced
/// until the bound holds again.
pub struct MemorySlotStorage<K> {
    schema: Arc<Schema>,
    settings: StorageSettings,
    slots: HashMap<K, Slot>,
    rng: StdRng,
    value_bytes: usize,
}

impl<K: DictionaryKey> MemorySlotStorage<K> {
    /// Creates an empty table for the given schema.
    pub fn new(schema: Arc<Schema>, settings: StorageSettings) -> Result<Self, DictionaryError> {
        settings.validate()?;
        Ok(Self {
            schema,
            settings,
            slots: HashMap::new(),
            rng: StdRng::from_entropy(),
            value_bytes: 0,
        })
    }

    fn classify(&self, key: &K, now: SystemTime) -> SlotState {
        match self.slots.get(key) {
            None => SlotState::Absent,
            Some(slot) => {
                if now < slot.deadline {
                    SlotState::Fresh
                } else if now < slot.deadline + self.settings.strict_max() {
                    SlotState::Expired
                } else {
                    SlotState::Absent
                }
            }
        }
    }

    /// Draws a jittered lifetime uniformly from the configured range.
    fn jittered_deadline(&mut self, now: SystemTime) -> SystemTime {
        let min_ms = self.settings.lifetime.min.as_millis() as u64;
        let max_ms = self.settings.lifetime.max.as_millis() as u64;
        let lifetime_ms = if min_ms >= max_ms {
            max_ms
        } else {
            self.rng.gen_range(min_ms..=max_ms)
        };
        now + Duration::from_millis(lifetime_ms)
    }

    fn slot_bytes(values: &[Value]) -> usize {
        values.iter().map(Value::heap_bytes).sum()
    }

    /// Displaces earliest-deadline slots until the capacity bound holds.
    fn evict_over_capacity(&mut self) {
        let capacity = self.settings.size_in_cells;
        while self.slots.len() > capacity {
            let victim = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.deadline)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else { break };
            if let Some(slot) = self.slots.remove(&key) {
                self.value_bytes -= Self::slot_bytes(&slot.values);
            }
        }
    }

    fn append_slot_row(fetched_columns: &mut [Column], slot: &Slot, request: &FetchRequest) {
        for (position, column) in fetched_columns.iter_mut().enumerate() {
            if request.contains_index(position) {
                // Slot values are kind-checked at insert.
                let _ = column.push(slot.values[position].clone());
            }
        }
    }
}

impl<K: DictionaryKey> SlotStorage<K> for MemorySlotStorage<K> {
    fn lookup(&mut self, keys: &[K], request: &FetchRequest) -> LookupResult<K> {
        let now = SystemTime::now();
        let mut result = LookupResult {
            fetched_columns: request.make_result_columns(),
            found_index: HashMap::new(),
            expired_index: HashMap::new(),
            refresh_keys: Vec::new(),
            refresh_rows: Vec::new(),
        };
        let mut rows = 0usize;

        for (key_index, key) in keys.iter().enumerate() {
            // First classification wins for duplicated input keys.
            if result.found_index.contains_key(key) || result.expired_index.contains_key(key) {
                continue;
            }
            match self.classify(key, now) {
                SlotState::Fresh => {
                    let slot = &self.slots[key];
                    Self::append_slot_row(&mut result.fetched_columns, slot, request);
                    result.found_index.insert(key.clone(), rows);
                    rows += 1;
                }
                SlotState::Expired => {
                    let slot = &self.slots[key];
                    Self::append_slot_row(&mut result.fetched_columns, slot, request);
                    result.expired_index.insert(key.clone(), rows);
                    rows += 1;
                    result.refresh_keys.push(key.clone());
                    result.refresh_rows.push(key_index);
                }
                SlotState::Absent => {
                    result.refresh_keys.push(key.clone());
                    result.refresh_rows.push(key_index);
                }
            }
        }

        result
    }

    fn insert(&mut self, keys: &[K], columns: &[Column]) -> Result<(), DictionaryError> {
        if columns.len() != self.schema.attribute_count() {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "insert expects {} attribute columns, got {}",
                    self.schema.attribute_count(),
                    columns.len()
                ),
            });
        }
        if columns.iter().any(|column| column.len() != keys.len()) {
            return Err(DictionaryError::TypeMismatch {
                reason: "insert columns are not row-aligned with the key list".to_string(),
            });
        }
        for (column, attribute) in columns.iter().zip(self.schema.attributes()) {
            if column.kind() != attribute.kind {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "attribute '{}' is {}, insert column is {}",
                        attribute.name,
                        attribute.kind,
                        column.kind()
                    ),
                });
            }
        }

        let now = SystemTime::now();
        for (row, key) in keys.iter().enumerate() {
            let values: Result<Vec<Value>, DictionaryError> = columns
                .iter()
                .map(|column| {
                    column
                        .value(row)
                        .ok_or_else(|| DictionaryError::TypeMismatch {
                            reason: format!("insert row {row} is out of range"),
                        })
                })
                .collect();
            let values = values?.into_boxed_slice();
            let deadline = self.jittered_deadline(now);

            self.value_bytes += Self::slot_bytes(&values);
            if let Some(previous) = self.slots.insert(key.clone(), Slot { values, deadline }) {
                self.value_bytes -= Self::slot_bytes(&previous.values);
            }
        }

        let before = self.slots.len();
        self.evict_over_capacity();
        if self.slots.len() < before {
            debug!(
                evicted = before - self.slots.len(),
                size = self.slots.len(),
                "slot table displaced entries over capacity"
            );
        }
        Ok(())
    }

    fn cached_keys(&self) -> Vec<K> {
        self.slots.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn capacity(&self) -> usize {
        self.settings.size_in_cells
    }

    fn bytes(&self) -> usize {
        self.value_bytes
            + self.slots.len() * (std::mem::size_of::<K>() + std::mem::size_of::<Slot>())
    }

    fn returns_in_key_order(&self) -> bool {
        // Lookup walks the input key list, so fetched rows follow it.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnKind;
    use crate::config::Lifetime;
    use crate::schema::{Attribute, KeyLayout};
    use std::thread::sleep;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                KeyLayout::Simple,
                vec![
                    Attribute::new("value", ColumnKind::UInt64, Value::UInt64(0)).unwrap(),
                    Attribute::new("label", ColumnKind::String, Value::String(String::new()))
                        .unwrap(),
                ],
            )
            .unwrap(),
        )
    }

    fn storage(
        size: usize,
        lifetime: Lifetime,
        strict_max: Option<Duration>,
    ) -> MemorySlotStorage<u64> {
        let mut settings = StorageSettings::new(size, lifetime);
        if let Some(strict) = strict_max {
            settings = settings.with_strict_max_lifetime(strict);
        }
        MemorySlotStorage::new(schema(), settings).unwrap()
    }

    fn insert_rows(storage: &mut MemorySlotStorage<u64>, keys: &[u64]) {
        let values = Column::UInt64(keys.iter().map(|k| k * 10).collect());
        let labels = Column::String(keys.iter().map(|k| format!("k{k}")).collect());
        storage.insert(keys, &[values, labels]).unwrap();
    }

    fn full_request() -> FetchRequest {
        FetchRequest::new(&schema(), &["value", "label"]).unwrap()
    }

    #[test]
    fn test_insert_then_lookup_is_fresh() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1, 2, 3]);

        let result = storage.lookup(&[1, 2, 3], &full_request());

        assert_eq!(result.found_count(), 3);
        assert_eq!(result.expired_count(), 0);
        assert!(result.refresh_keys.is_empty());
        assert_eq!(result.fetched_columns[0], Column::UInt64(vec![10, 20, 30]));
    }

    #[test]
    fn test_lookup_rows_follow_input_key_order() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1, 2, 3]);

        let result = storage.lookup(&[3, 1, 2], &full_request());

        assert!(storage.returns_in_key_order());
        assert_eq!(result.fetched_columns[0], Column::UInt64(vec![30, 10, 20]));
        assert_eq!(result.found_index[&3], 0);
        assert_eq!(result.found_index[&1], 1);
        assert_eq!(result.found_index[&2], 2);
    }

    #[test]
    fn test_absent_keys_are_collected_for_refresh() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1]);

        let result = storage.lookup(&[5, 1, 7], &full_request());

        assert_eq!(result.found_count(), 1);
        assert_eq!(result.refresh_keys, vec![5, 7]);
        assert_eq!(result.refresh_rows, vec![0, 2]);
    }

    #[test]
    fn test_expired_keys_classify_and_join_refresh_set() {
        let lifetime = Lifetime::new(Duration::from_millis(30), Duration::from_millis(30)).unwrap();
        let mut storage = storage(10, lifetime, Some(Duration::from_secs(60)));
        insert_rows(&mut storage, &[9]);

        sleep(Duration::from_millis(60));
        let result = storage.lookup(&[9], &full_request());

        assert_eq!(result.found_count(), 0);
        assert_eq!(result.expired_count(), 1);
        assert_eq!(result.refresh_keys, vec![9]);
        assert_eq!(result.fetched_columns[0], Column::UInt64(vec![90]));
    }

    #[test]
    fn test_slot_past_strict_max_is_absent() {
        let lifetime = Lifetime::new(Duration::from_millis(20), Duration::from_millis(20)).unwrap();
        let mut storage = storage(10, lifetime, Some(Duration::from_millis(20)));
        insert_rows(&mut storage, &[9]);

        sleep(Duration::from_millis(80));
        let result = storage.lookup(&[9], &full_request());

        assert_eq!(result.found_count(), 0);
        assert_eq!(result.expired_count(), 0);
        assert_eq!(result.refresh_keys, vec![9]);
    }

    #[test]
    fn test_reinsert_refreshes_slot() {
        let lifetime = Lifetime::new(Duration::from_millis(30), Duration::from_millis(30)).unwrap();
        let mut storage = storage(10, lifetime, Some(Duration::from_secs(60)));
        insert_rows(&mut storage, &[9]);
        sleep(Duration::from_millis(60));

        insert_rows(&mut storage, &[9]);
        let result = storage.lookup(&[9], &full_request());

        assert_eq!(result.found_count(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_capacity_is_a_strict_bound() {
        let mut storage = storage(4, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1, 2, 3, 4, 5, 6]);

        assert!(storage.len() <= storage.capacity());
        assert_eq!(storage.len(), 4);
    }

    #[test]
    fn test_unrequested_columns_stay_empty() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1]);

        let request = FetchRequest::new(&schema(), &["label"]).unwrap();
        let result = storage.lookup(&[1], &request);

        assert!(result.fetched_columns[0].is_empty());
        assert_eq!(
            result.fetched_columns[1],
            Column::String(vec!["k1".to_string()])
        );
    }

    #[test]
    fn test_cached_keys_snapshot() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        insert_rows(&mut storage, &[1, 2]);

        let mut keys = storage.cached_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn test_bytes_accounting_grows_and_shrinks() {
        let mut storage = storage(2, Lifetime::from_secs(60, 120).unwrap(), None);
        assert_eq!(storage.bytes(), 0);

        insert_rows(&mut storage, &[1, 2]);
        let two_entries = storage.bytes();
        assert!(two_entries > 0);

        // Displacement keeps the byte accounting in step with the table.
        insert_rows(&mut storage, &[3, 4, 5]);
        assert!(storage.len() <= 2);
        assert!(storage.bytes() <= two_entries + 256);
    }

    #[test]
    fn test_insert_rejects_misaligned_columns() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        let result = storage.insert(
            &[1, 2],
            &[
                Column::UInt64(vec![10]),
                Column::String(vec!["a".to_string()]),
            ],
        );
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }

    #[test]
    fn test_insert_rejects_wrong_width() {
        let mut storage = storage(10, Lifetime::from_secs(60, 120).unwrap(), None);
        let result = storage.insert(&[1], &[Column::UInt64(vec![10])]);
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }
}
