//! External record source contract.
//!
//! A [`Source`] serves bulk reads over keys as a blocking stream of
//! column [`Block`]s. The first `key_width` columns of every block are the
//! key columns in schema order; the remainder are attributes in schema order.

mod mock;

pub use mock::MapSource;

use crate::columns::Column;
use thiserror::Error;

/// Errors raised by an external record source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// The read itself failed (connection, protocol, backend error).
    #[error("source read failed: {0}")]
    Read(String),

    /// The source cannot serve this style of request.
    #[error("source does not support operation: {0}")]
    Unsupported(String),
}

/// One batch of rows from a source stream.
///
/// A block may be empty; end-of-stream terminates the fetch.
#[derive(Debug, Clone)]
pub struct Block {
    pub columns: Vec<Column>,
}

impl Block {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of rows, taken from the first column.
    pub fn rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// A blocking stream of row batches.
pub trait BlockStream: Send {
    /// Reads the next block, or `None` at end-of-stream.
    fn next_block(&mut self) -> Result<Option<Block>, SourceError>;
}

/// An external record source capable of selective bulk reads.
pub trait Source: Send + Sync {
    /// Whether the source can load individual keys on demand.
    ///
    /// Cache layouts require this; construction fails otherwise.
    fn supports_selective_load(&self) -> bool;

    /// Streams records for the given simple keys.
    fn load_ids(&self, ids: &[u64]) -> Result<Box<dyn BlockStream>, SourceError>;

    /// Streams records for the selected rows of the given key columns.
    fn load_keys(
        &self,
        key_columns: &[Column],
        rows: &[usize],
    ) -> Result<Box<dyn BlockStream>, SourceError>;

    /// Source name for logging and error messages.
    fn name(&self) -> &str;
}
