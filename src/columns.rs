//! Typed column vectors exchanged between the cache, the source, and callers.
//!
//! All bulk data in the crate moves as [`Column`]s: one kind-homogeneous
//! vector per attribute, row-aligned across a result set. Single cells are
//! represented as [`Value`]s.

use crate::error::DictionaryError;
use std::fmt;

/// Scalar kind of an attribute or key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    UInt64,
    Int64,
    Float64,
    String,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::UInt64 => write!(f, "UInt64"),
            ColumnKind::Int64 => write!(f, "Int64"),
            ColumnKind::Float64 => write!(f, "Float64"),
            ColumnKind::String => write!(f, "String"),
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt64(u64),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::UInt64(_) => ColumnKind::UInt64,
            Value::Int64(_) => ColumnKind::Int64,
            Value::Float64(_) => ColumnKind::Float64,
            Value::String(_) => ColumnKind::String,
        }
    }

    /// Returns the contained `u64`, if this is a `UInt64` value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Appends the byte image of this value to `out`.
    ///
    /// Fixed-width scalars are written little-endian; strings are
    /// length-prefixed. Used to materialize composite keys.
    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Value::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::String(s) => {
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Approximate heap + inline footprint in bytes.
    pub(crate) fn heap_bytes(&self) -> usize {
        match self {
            Value::String(s) => std::mem::size_of::<Value>() + s.len(),
            _ => std::mem::size_of::<Value>(),
        }
    }
}

/// A kind-homogeneous column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    UInt64(Vec<u64>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    String(Vec<String>),
}

impl Column {
    /// Creates an empty column of the given kind.
    pub fn new(kind: ColumnKind) -> Self {
        Self::with_capacity(kind, 0)
    }

    /// Creates an empty column of the given kind with reserved capacity.
    pub fn with_capacity(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::UInt64 => Column::UInt64(Vec::with_capacity(capacity)),
            ColumnKind::Int64 => Column::Int64(Vec::with_capacity(capacity)),
            ColumnKind::Float64 => Column::Float64(Vec::with_capacity(capacity)),
            ColumnKind::String => Column::String(Vec::with_capacity(capacity)),
        }
    }

    /// Returns the kind of this column.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::UInt64(_) => ColumnKind::UInt64,
            Column::Int64(_) => ColumnKind::Int64,
            Column::Float64(_) => ColumnKind::Float64,
            Column::String(_) => ColumnKind::String,
        }
    }

    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::UInt64(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::String(v) => v.len(),
        }
    }

    /// Returns true if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value, which must match the column kind.
    pub fn push(&mut self, value: Value) -> Result<(), DictionaryError> {
        match (self, value) {
            (Column::UInt64(v), Value::UInt64(x)) => v.push(x),
            (Column::Int64(v), Value::Int64(x)) => v.push(x),
            (Column::Float64(v), Value::Float64(x)) => v.push(x),
            (Column::String(v), Value::String(x)) => v.push(x),
            (col, value) => {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "cannot push {} value into {} column",
                        value.kind(),
                        col.kind()
                    ),
                })
            }
        }
        Ok(())
    }

    /// Returns the value at `row`, or `None` past the end.
    pub fn value(&self, row: usize) -> Option<Value> {
        match self {
            Column::UInt64(v) => v.get(row).copied().map(Value::UInt64),
            Column::Int64(v) => v.get(row).copied().map(Value::Int64),
            Column::Float64(v) => v.get(row).copied().map(Value::Float64),
            Column::String(v) => v.get(row).cloned().map(Value::String),
        }
    }

    /// Appends row `row` of `other` onto this column.
    pub fn push_from(&mut self, other: &Column, row: usize) -> Result<(), DictionaryError> {
        let value = other
            .value(row)
            .ok_or_else(|| DictionaryError::TypeMismatch {
                reason: format!("row {row} is out of range for {} column", other.kind()),
            })?;
        self.push(value)
    }

    /// Borrows the rows as a `u64` slice, if this is a `UInt64` column.
    pub fn as_u64_slice(&self) -> Option<&[u64]> {
        match self {
            Column::UInt64(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}
