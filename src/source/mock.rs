//! In-memory source for tests, examples, and development.

use super::{Block, BlockStream, Source, SourceError};
use crate::columns::{Column, Value};
use crate::error::DictionaryError;
use crate::schema::Schema;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A [`Source`] backed by an in-memory row set.
///
/// Rows are added up front; `load_ids` / `load_keys` filter them by the
/// requested keys and stream them back in insertion order, split into blocks
/// of `batch_size` rows. Failure injection and a per-call delay make the
/// worker paths testable.
pub struct MapSource {
    schema: Arc<Schema>,
    rows: Vec<StoredRow>,
    batch_size: usize,
    delay: Option<Duration>,
    fail: AtomicBool,
    selective: bool,
    calls: AtomicU64,
}

struct StoredRow {
    key_values: Vec<Value>,
    attribute_values: Vec<Value>,
}

impl MapSource {
    /// Creates an empty source for the given schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            batch_size: 1024,
            delay: None,
            fail: AtomicBool::new(false),
            selective: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Adds a row with a simple `u64` key.
    pub fn with_simple_row(
        self,
        id: u64,
        attribute_values: Vec<Value>,
    ) -> Result<Self, DictionaryError> {
        self.with_row(vec![Value::UInt64(id)], attribute_values)
    }

    /// Adds a row with explicit key values.
    pub fn with_row(
        mut self,
        key_values: Vec<Value>,
        attribute_values: Vec<Value>,
    ) -> Result<Self, DictionaryError> {
        if key_values.len() != self.schema.key_width() {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "row has {} key values, schema declares {}",
                    key_values.len(),
                    self.schema.key_width()
                ),
            });
        }
        if attribute_values.len() != self.schema.attribute_count() {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "row has {} attribute values, schema declares {}",
                    attribute_values.len(),
                    self.schema.attribute_count()
                ),
            });
        }
        for (value, attribute) in attribute_values.iter().zip(self.schema.attributes()) {
            if value.kind() != attribute.kind {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "attribute '{}' is {}, row value is {}",
                        attribute.name,
                        attribute.kind,
                        value.kind()
                    ),
                });
            }
        }
        self.rows.push(StoredRow {
            key_values,
            attribute_values,
        });
        Ok(self)
    }

    /// Rows per streamed block.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sleeps this long inside every load call, to simulate a slow backend.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Declares the source as unable to load selectively.
    pub fn without_selective_load(mut self) -> Self {
        self.selective = false;
        self
    }

    /// Makes subsequent load calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Number of load calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn stream_rows(&self, selected: Vec<usize>) -> Result<Box<dyn BlockStream>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Read("injected source failure".to_string()));
        }

        let mut blocks = VecDeque::new();
        for chunk in selected.chunks(self.batch_size) {
            let mut columns = Vec::with_capacity(
                self.schema.key_width() + self.schema.attribute_count(),
            );
            for key_index in 0..self.schema.key_width() {
                let mut column = Column::with_capacity(
                    self.rows[chunk[0]].key_values[key_index].kind(),
                    chunk.len(),
                );
                for &row in chunk {
                    column
                        .push(self.rows[row].key_values[key_index].clone())
                        .map_err(|e| SourceError::Read(e.to_string()))?;
                }
                columns.push(column);
            }
            for (position, attribute) in self.schema.attributes().iter().enumerate() {
                let mut column = Column::new(attribute.kind);
                for &row in chunk {
                    column
                        .push(self.rows[row].attribute_values[position].clone())
                        .map_err(|e| SourceError::Read(e.to_string()))?;
                }
                columns.push(column);
            }
            blocks.push_back(Block::new(columns));
        }
        Ok(Box::new(VecBlockStream { blocks }))
    }
}

impl Source for MapSource {
    fn supports_selective_load(&self) -> bool {
        self.selective
    }

    fn load_ids(&self, ids: &[u64]) -> Result<Box<dyn BlockStream>, SourceError> {
        let selected = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| match row.key_values.as_slice() {
                [Value::UInt64(id)] => ids.contains(id),
                _ => false,
            })
            .map(|(index, _)| index)
            .collect();
        self.stream_rows(selected)
    }

    fn load_keys(
        &self,
        key_columns: &[Column],
        rows: &[usize],
    ) -> Result<Box<dyn BlockStream>, SourceError> {
        let mut requested = Vec::with_capacity(rows.len());
        for &row in rows {
            let tuple: Option<Vec<Value>> =
                key_columns.iter().map(|column| column.value(row)).collect();
            let tuple = tuple.ok_or_else(|| {
                SourceError::Read(format!("requested row {row} is out of range"))
            })?;
            requested.push(tuple);
        }

        let selected = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| requested.iter().any(|tuple| *tuple == row.key_values))
            .map(|(index, _)| index)
            .collect();
        self.stream_rows(selected)
    }

    fn name(&self) -> &str {
        "map-source"
    }
}

struct VecBlockStream {
    blocks: VecDeque<Block>,
}

impl BlockStream for VecBlockStream {
    fn next_block(&mut self) -> Result<Option<Block>, SourceError> {
        Ok(self.blocks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnKind;
    use crate::schema::{Attribute, KeyLayout};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                KeyLayout::Simple,
                vec![Attribute::new("a", ColumnKind::UInt64, Value::UInt64(0)).unwrap()],
            )
            .unwrap(),
        )
    }

    fn drain(mut stream: Box<dyn BlockStream>) -> Vec<Block> {
        let mut blocks = Vec::new();
        while let Some(block) = stream.next_block().unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn test_load_ids_filters_requested_keys() {
        let source = MapSource::new(schema())
            .with_simple_row(5, vec![Value::UInt64(50)])
            .unwrap()
            .with_simple_row(6, vec![Value::UInt64(60)])
            .unwrap();

        let blocks = drain(source.load_ids(&[6, 7]).unwrap());

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rows(), 1);
        assert_eq!(blocks[0].columns[0], Column::UInt64(vec![6]));
        assert_eq!(blocks[0].columns[1], Column::UInt64(vec![60]));
    }

    #[test]
    fn test_load_ids_empty_result_has_no_blocks() {
        let source = MapSource::new(schema());
        let blocks = drain(source.load_ids(&[1]).unwrap());
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_batch_size_splits_blocks() {
        let mut source = MapSource::new(schema()).with_batch_size(2);
        for id in 0..5 {
            source = source
                .with_simple_row(id, vec![Value::UInt64(id * 10)])
                .unwrap();
        }

        let ids: Vec<u64> = (0..5).collect();
        let blocks = drain(source.load_ids(&ids).unwrap());

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].rows(), 2);
        assert_eq!(blocks[2].rows(), 1);
    }

    #[test]
    fn test_failure_injection() {
        let source = MapSource::new(schema());
        source.set_failing(true);
        assert!(matches!(source.load_ids(&[1]), Err(SourceError::Read(_))));

        source.set_failing(false);
        assert!(source.load_ids(&[1]).is_ok());
    }

    #[test]
    fn test_call_counter() {
        let source = MapSource::new(schema());
        assert_eq!(source.calls(), 0);
        let _ = source.load_ids(&[1]);
        let _ = source.load_ids(&[2]);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_with_row_validates_attribute_kinds() {
        let result = MapSource::new(schema())
            .with_simple_row(1, vec![Value::String("x".to_string())]);
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }

    #[test]
    fn test_without_selective_load() {
        let source = MapSource::new(schema()).without_selective_load();
        assert!(!source.supports_selective_load());
    }

    #[test]
    fn test_load_keys_matches_tuples() {
        let schema = Arc::new(
            Schema::new(
                KeyLayout::Complex(vec![
                    crate::schema::KeyColumn::new("country", ColumnKind::String),
                    crate::schema::KeyColumn::new("code", ColumnKind::UInt64),
                ]),
                vec![Attribute::new("a", ColumnKind::UInt64, Value::UInt64(0)).unwrap()],
            )
            .unwrap(),
        );
        let source = MapSource::new(schema)
            .with_row(
                vec![Value::String("de".to_string()), Value::UInt64(49)],
                vec![Value::UInt64(1)],
            )
            .unwrap()
            .with_row(
                vec![Value::String("fr".to_string()), Value::UInt64(33)],
                vec![Value::UInt64(2)],
            )
            .unwrap();

        let key_columns = [
            Column::String(vec!["fr".to_string(), "es".to_string()]),
            Column::UInt64(vec![33, 34]),
        ];
        let blocks = drain(source.load_keys(&key_columns, &[0, 1]).unwrap());

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rows(), 1);
        assert_eq!(blocks[0].columns[2], Column::UInt64(vec![2]));
    }
}
