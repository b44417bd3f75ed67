//! Projection descriptors over the attribute schema.
//!
//! A [`FetchRequest`] is built once per query from the full schema and the
//! caller's requested attribute names. It answers "is attribute *i*
//! requested", manufactures empty result columns of the right width, and
//! projects full-width results down to the caller's declared order.

use crate::columns::{Column, Value};
use crate::error::DictionaryError;
use crate::schema::Schema;
use std::sync::Arc;

/// Immutable projection descriptor for one query.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    schema: Arc<Schema>,
    /// Requested flag by schema position.
    requested_mask: Vec<bool>,
    /// Schema positions in the caller's declared order.
    requested_positions: Vec<usize>,
}

impl FetchRequest {
    /// Builds a request for the named attributes.
    ///
    /// An empty name list is valid and describes an existence-only fetch.
    pub fn new(schema: &Arc<Schema>, attribute_names: &[&str]) -> Result<Self, DictionaryError> {
        let mut requested_mask = vec![false; schema.attribute_count()];
        let mut requested_positions = Vec::with_capacity(attribute_names.len());

        for name in attribute_names {
            let position =
                schema
                    .attribute_index(name)
                    .ok_or_else(|| DictionaryError::BadConfiguration {
                        reason: format!("no attribute '{name}' in dictionary schema"),
                    })?;
            if requested_mask[position] {
                return Err(DictionaryError::BadConfiguration {
                    reason: format!("attribute '{name}' requested twice"),
                });
            }
            requested_mask[position] = true;
            requested_positions.push(position);
        }

        Ok(Self {
            schema: Arc::clone(schema),
            requested_mask,
            requested_positions,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Full schema width (requested or not).
    pub fn attribute_count(&self) -> usize {
        self.requested_mask.len()
    }

    /// Whether the attribute at schema position `index` was requested.
    pub fn contains_index(&self, index: usize) -> bool {
        self.requested_mask.get(index).copied().unwrap_or(false)
    }

    /// Number of requested attributes.
    pub fn requested_count(&self) -> usize {
        self.requested_positions.len()
    }

    /// Schema positions of the requested attributes in caller order.
    pub fn requested_positions(&self) -> &[usize] {
        &self.requested_positions
    }

    /// One empty, correctly-typed column per schema attribute.
    ///
    /// Unrequested positions get a placeholder that stays empty.
    pub fn make_result_columns(&self) -> Vec<Column> {
        self.schema.make_empty_columns()
    }

    /// Projects a full-width result down to the requested attributes in the
    /// caller's declared order.
    pub fn filter_requested(&self, columns: Vec<Column>) -> Vec<Column> {
        let mut slots: Vec<Option<Column>> = columns.into_iter().map(Some).collect();
        self.requested_positions
            .iter()
            .map(|&position| {
                slots
                    .get_mut(position)
                    .and_then(Option::take)
                    .unwrap_or_else(|| Column::new(self.schema.attributes()[position].kind))
            })
            .collect()
    }
}

/// Per-attribute fallback used during the merge step.
///
/// Prefers the caller-supplied default column when present, otherwise the
/// schema's null sentinel.
#[derive(Debug, Clone)]
pub struct DefaultProvider {
    null_value: Value,
    column: Option<Column>,
}

impl DefaultProvider {
    pub fn new(null_value: Value) -> Self {
        Self {
            null_value,
            column: None,
        }
    }

    pub fn with_column(null_value: Value, column: Column) -> Self {
        Self {
            null_value,
            column: Some(column),
        }
    }

    /// The fallback value for input row `row`.
    pub fn value_at(&self, row: usize) -> Value {
        self.column
            .as_ref()
            .and_then(|column| column.value(row))
            .unwrap_or_else(|| self.null_value.clone())
    }
}
