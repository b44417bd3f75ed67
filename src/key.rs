//! Key variants: simple 64-bit identifiers and byte-materialized tuple keys.
//!
//! The cache is generic over [`DictionaryKey`]. Simple layouts use `u64`
//! directly; complex layouts use [`ComplexKey`], whose byte image is shared
//! between the update unit that produced it and the slot table that stores it.

use crate::columns::{Column, ColumnKind, Value};
use crate::error::DictionaryError;
use crate::schema::{KeyLayout, Schema};
use crate::source::{BlockStream, Source, SourceError};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Which key variant a layout uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Simple,
    Complex,
}

/// Row selection for a complex-key source fetch: the caller's key columns
/// plus the rows that need refreshing.
#[derive(Debug, Clone)]
pub struct KeySelection {
    pub key_columns: Vec<Column>,
    pub rows: Vec<usize>,
}

/// A dictionary key: extracted from key columns, compared by value, and
/// routed to the matching source load call.
pub trait DictionaryKey: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {
    const KIND: KeyKind;

    /// Extracts one key per row from `key_columns`, validated against the
    /// schema's key layout.
    fn extract(key_columns: &[Column], schema: &Schema) -> Result<Vec<Self>, DictionaryError>;

    /// Rebuilds key columns from a key list, for block iteration output.
    fn to_columns(keys: &[Self], schema: &Schema) -> Result<Vec<Column>, DictionaryError>;

    /// Starts the source fetch appropriate for this key variant.
    fn load(
        source: &dyn Source,
        keys: &[Self],
        selection: Option<&KeySelection>,
    ) -> Result<Box<dyn BlockStream>, SourceError>;
}

impl DictionaryKey for u64 {
    const KIND: KeyKind = KeyKind::Simple;

    fn extract(key_columns: &[Column], schema: &Schema) -> Result<Vec<Self>, DictionaryError> {
        if !matches!(schema.key_layout(), KeyLayout::Simple) {
            return Err(DictionaryError::Unsupported {
                reason: "simple keys cannot be extracted from a complex key layout".to_string(),
            });
        }
        if key_columns.len() != 1 {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "simple key layout expects 1 key column, got {}",
                    key_columns.len()
                ),
            });
        }
        key_columns[0]
            .as_u64_slice()
            .map(|ids| ids.to_vec())
            .ok_or_else(|| DictionaryError::TypeMismatch {
                reason: format!(
                    "simple key column must be UInt64, got {}",
                    key_columns[0].kind()
                ),
            })
    }

    fn to_columns(keys: &[Self], _schema: &Schema) -> Result<Vec<Column>, DictionaryError> {
        Ok(vec![Column::UInt64(keys.to_vec())])
    }

    fn load(
        source: &dyn Source,
        keys: &[Self],
        _selection: Option<&KeySelection>,
    ) -> Result<Box<dyn BlockStream>, SourceError> {
        source.load_ids(keys)
    }
}

/// A composite key materialized into its byte representation.
///
/// Hashing and equality go through the byte image, so two keys built from
/// equal column values compare equal regardless of origin. The buffer is
/// reference-counted: the update unit that materialized the key and the slot
/// table that stores it share it without copying.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ComplexKey(Arc<[u8]>);

impl ComplexKey {
    /// Materializes the key for `row` of the given key columns.
    pub fn from_row(key_columns: &[Column], row: usize) -> Result<Self, DictionaryError> {
        let mut bytes = Vec::new();
        for column in key_columns {
            let value = column
                .value(row)
                .ok_or_else(|| DictionaryError::TypeMismatch {
                    reason: format!("key row {row} is out of range"),
                })?;
            value.write_bytes(&mut bytes);
        }
        Ok(Self(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the key back into one value per key column of `layout`.
    pub fn decode(&self, layout: &KeyLayout) -> Result<Vec<Value>, DictionaryError> {
        let columns = match layout {
            KeyLayout::Complex(columns) => columns,
            KeyLayout::Simple => {
                return Err(DictionaryError::Unsupported {
                    reason: "complex keys cannot be decoded with a simple key layout".to_string(),
                })
            }
        };

        let bytes = &self.0;
        let mut offset = 0usize;
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match column.kind {
                ColumnKind::UInt64 => {
                    let raw = read_fixed(bytes, &mut offset, &column.name)?;
                    Value::UInt64(u64::from_le_bytes(raw))
                }
                ColumnKind::Int64 => {
                    let raw = read_fixed(bytes, &mut offset, &column.name)?;
                    Value::Int64(i64::from_le_bytes(raw))
                }
                ColumnKind::Float64 => {
                    let raw = read_fixed(bytes, &mut offset, &column.name)?;
                    Value::Float64(f64::from_bits(u64::from_le_bytes(raw)))
                }
                ColumnKind::String => {
                    let raw = read_fixed(bytes, &mut offset, &column.name)?;
                    let len = u64::from_le_bytes(raw) as usize;
                    let end =
                        offset
                            .checked_add(len)
                            .filter(|end| *end <= bytes.len())
                            .ok_or_else(|| truncated(&column.name))?;
                    let text = std::str::from_utf8(&bytes[offset..end])
                        .map_err(|_| truncated(&column.name))?;
                    offset = end;
                    Value::String(text.to_string())
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

fn read_fixed(bytes: &[u8], offset: &mut usize, column: &str) -> Result<[u8; 8], DictionaryError> {
    let end = offset
        .checked_add(8)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| truncated(column))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[*offset..end]);
    *offset = end;
    Ok(raw)
}

fn truncated(column: &str) -> DictionaryError {
    DictionaryError::TypeMismatch {
        reason: format!("complex key image is truncated at column '{column}'"),
    }
}

impl fmt::Debug for ComplexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComplexKey({} bytes)", self.0.len())
    }
}

impl DictionaryKey for ComplexKey {
    const KIND: KeyKind = KeyKind::Complex;

    fn extract(key_columns: &[Column], schema: &Schema) -> Result<Vec<Self>, DictionaryError> {
        let layout_columns = match schema.key_layout() {
            KeyLayout::Complex(columns) => columns,
            KeyLayout::Simple => {
                return Err(DictionaryError::Unsupported {
                    reason: "complex keys cannot be extracted from a simple key layout"
                        .to_string(),
                })
            }
        };
        if key_columns.len() != layout_columns.len() {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "complex key layout expects {} key columns, got {}",
                    layout_columns.len(),
                    key_columns.len()
                ),
            });
        }
        for (column, declared) in key_columns.iter().zip(layout_columns) {
            if column.kind() != declared.kind {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "key column '{}' must be {}, got {}",
                        declared.name,
                        declared.kind,
                        column.kind()
                    ),
                });
            }
        }

        let rows = key_columns.first().map(Column::len).unwrap_or(0);
        if key_columns.iter().any(|column| column.len() != rows) {
            return Err(DictionaryError::TypeMismatch {
                reason: "key columns are not row-aligned".to_string(),
            });
        }

        (0..rows)
            .map(|row| ComplexKey::from_row(key_columns, row))
            .collect()
    }

    fn to_columns(keys: &[Self], schema: &Schema) -> Result<Vec<Column>, DictionaryError> {
        let layout = schema.key_layout();
        let layout_columns = match layout {
            KeyLayout::Complex(columns) => columns,
            KeyLayout::Simple => {
                return Err(DictionaryError::Unsupported {
                    reason: "complex keys cannot be rebuilt under a simple key layout".to_string(),
                })
            }
        };
        let mut columns: Vec<Column> = layout_columns
            .iter()
            .map(|column| Column::with_capacity(column.kind, keys.len()))
            .collect();
        for key in keys {
            for (column, value) in columns.iter_mut().zip(key.decode(layout)?) {
                column.push(value)?;
            }
        }
        Ok(columns)
    }

    fn load(
        source: &dyn Source,
        _keys: &[Self],
        selection: Option<&KeySelection>,
    ) -> Result<Box<dyn BlockStream>, SourceError> {
        let selection = selection.ok_or_else(|| {
            SourceError::Unsupported("complex key fetch requires a row selection".to_string())
        })?;
        source.load_keys(&selection.key_columns, &selection.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, KeyColumn};

    fn simple_schema() -> Schema {
        Schema::new(
            KeyLayout::Simple,
            vec![Attribute::new("a", ColumnKind::UInt64, Value::UInt64(0)).unwrap()],
        )
        .unwrap()
    }

    fn complex_schema() -> Schema {
        Schema::new(
            KeyLayout::Complex(vec![
                KeyColumn::new("country", ColumnKind::String),
                KeyColumn::new("code", ColumnKind::UInt64),
            ]),
            vec![Attribute::new("a", ColumnKind::UInt64, Value::UInt64(0)).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_simple_extract() {
        let schema = simple_schema();
        let keys = u64::extract(&[Column::UInt64(vec![3, 1, 2])], &schema).unwrap();
        assert_eq!(keys, vec![3, 1, 2]);
    }

    #[test]
    fn test_simple_extract_rejects_wrong_kind() {
        let schema = simple_schema();
        let result = u64::extract(&[Column::String(vec!["x".to_string()])], &schema);
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }

    #[test]
    fn test_simple_extract_rejects_multiple_columns() {
        let schema = simple_schema();
        let cols = [Column::UInt64(vec![1]), Column::UInt64(vec![2])];
        let result = u64::extract(&cols, &schema);
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }

    #[test]
    fn test_complex_keys_equal_by_value() {
        let cols = [
            Column::String(vec!["de".to_string(), "de".to_string()]),
            Column::UInt64(vec![7, 7]),
        ];
        let a = ComplexKey::from_row(&cols, 0).unwrap();
        let b = ComplexKey::from_row(&cols, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_complex_keys_differ_by_value() {
        let cols = [
            Column::String(vec!["de".to_string(), "fr".to_string()]),
            Column::UInt64(vec![7, 7]),
        ];
        let a = ComplexKey::from_row(&cols, 0).unwrap();
        let b = ComplexKey::from_row(&cols, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_complex_extract_validates_layout() {
        let schema = complex_schema();
        let cols = [Column::UInt64(vec![1])];
        let result = ComplexKey::extract(&cols, &schema);
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }

    #[test]
    fn test_complex_decode_round_trip() {
        let schema = complex_schema();
        let cols = [
            Column::String(vec!["de".to_string()]),
            Column::UInt64(vec![49]),
        ];
        let key = ComplexKey::from_row(&cols, 0).unwrap();

        let values = key.decode(schema.key_layout()).unwrap();
        assert_eq!(
            values,
            vec![Value::String("de".to_string()), Value::UInt64(49)]
        );
    }

    #[test]
    fn test_complex_to_columns_round_trip() {
        let schema = complex_schema();
        let cols = [
            Column::String(vec!["de".to_string(), "fr".to_string()]),
            Column::UInt64(vec![49, 33]),
        ];
        let keys = ComplexKey::extract(&cols, &schema).unwrap();

        let rebuilt = ComplexKey::to_columns(&keys, &schema).unwrap();
        assert_eq!(rebuilt[0], cols[0]);
        assert_eq!(rebuilt[1], cols[1]);
    }

    #[test]
    fn test_complex_decode_rejects_truncated_image() {
        let schema = complex_schema();
        let key = ComplexKey(Arc::from(&b"abc"[..]));
        let result = key.decode(schema.key_layout());
        assert!(matches!(result, Err(DictionaryError::TypeMismatch { .. })));
    }
}
