//! Attribute schema for dictionary layouts.
//!
//! A [`Schema`] fixes the key shape and the attribute set of a dictionary at
//! construction time. At most one attribute may be marked hierarchical, and
//! that attribute must be `UInt64`.

use crate::columns::{Column, ColumnKind, Value};
use crate::error::DictionaryError;

/// One column of a composite key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyColumn {
    pub name: String,
    pub kind: ColumnKind,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Key shape of a dictionary layout, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyLayout {
    /// A single 64-bit unsigned identifier.
    Simple,
    /// A tuple of typed key columns.
    Complex(Vec<KeyColumn>),
}

impl KeyLayout {
    /// Number of key columns.
    pub fn width(&self) -> usize {
        match self {
            KeyLayout::Simple => 1,
            KeyLayout::Complex(columns) => columns.len(),
        }
    }
}

/// A schema-declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub kind: ColumnKind,
    /// Sentinel emitted when no value exists and the caller supplied no default.
    pub null_value: Value,
    /// Marks the attribute as the hierarchical parent link.
    pub hierarchical: bool,
}

impl Attribute {
    /// Creates a non-hierarchical attribute.
    ///
    /// The null value must match the declared kind.
    pub fn new(
        name: impl Into<String>,
        kind: ColumnKind,
        null_value: Value,
    ) -> Result<Self, DictionaryError> {
        let name = name.into();
        if null_value.kind() != kind {
            return Err(DictionaryError::TypeMismatch {
                reason: format!(
                    "null value of attribute '{name}' is {} but the attribute is {kind}",
                    null_value.kind()
                ),
            });
        }
        Ok(Self {
            name,
            kind,
            null_value,
            hierarchical: false,
        })
    }

    /// Marks this attribute as the hierarchical parent link.
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }
}

/// Validated key layout + attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    key: KeyLayout,
    attributes: Vec<Attribute>,
    hierarchical_index: Option<usize>,
}

impl Schema {
    /// Builds a schema, validating attribute names and the hierarchical rule.
    ///
    /// # Errors
    ///
    /// * duplicate attribute names or an empty attribute set
    /// * more than one hierarchical attribute
    /// * a hierarchical attribute that is not `UInt64`
    pub fn new(key: KeyLayout, attributes: Vec<Attribute>) -> Result<Self, DictionaryError> {
        if attributes.is_empty() {
            return Err(DictionaryError::BadConfiguration {
                reason: "schema must declare at least one attribute".to_string(),
            });
        }
        if let KeyLayout::Complex(columns) = &key {
            if columns.is_empty() {
                return Err(DictionaryError::BadConfiguration {
                    reason: "complex key layout must declare at least one key column".to_string(),
                });
            }
        }

        let mut hierarchical_index = None;
        for (index, attribute) in attributes.iter().enumerate() {
            if attributes[..index]
                .iter()
                .any(|other| other.name == attribute.name)
            {
                return Err(DictionaryError::BadConfiguration {
                    reason: format!("duplicate attribute name '{}'", attribute.name),
                });
            }
            if attribute.hierarchical {
                if hierarchical_index.is_some() {
                    return Err(DictionaryError::BadConfiguration {
                        reason: "at most one attribute may be hierarchical".to_string(),
                    });
                }
                if attribute.kind != ColumnKind::UInt64 {
                    return Err(DictionaryError::TypeMismatch {
                        reason: format!(
                            "hierarchical attribute '{}' must be UInt64",
                            attribute.name
                        ),
                    });
                }
                hierarchical_index = Some(index);
            }
        }

        Ok(Self {
            key,
            attributes,
            hierarchical_index,
        })
    }

    pub fn key_layout(&self) -> &KeyLayout {
        &self.key
    }

    /// Number of key columns in a source block.
    pub fn key_width(&self) -> usize {
        self.key.width()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Position of the named attribute, if declared.
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.name == name)
    }

    /// The hierarchical attribute and its position, if one is declared.
    pub fn hierarchical_attribute(&self) -> Option<(usize, &Attribute)> {
        self.hierarchical_index
            .map(|index| (index, &self.attributes[index]))
    }

    /// One empty column per attribute, in schema order.
    pub fn make_empty_columns(&self) -> Vec<Column> {
        self.attributes
            .iter()
            .map(|attribute| Column::new(attribute.kind))
            .collect()
    }
}
