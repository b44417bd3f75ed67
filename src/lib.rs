//! dictcache - Read-through external dictionary cache
//!
//! A concurrent, bounded, TTL-bearing key→attributes cache fronting an
//! external record source. Queries ask for a set of keys and a projection of
//! attributes; the cache answers every key from a fresh slot, a synchronous
//! refresh, or a caller-supplied default, and can serve expired slots while
//! refreshing them in the background.
//!
//! # High-Level API
//!
//! ```ignore
//! use dictcache::config::{DictionarySettings, Lifetime, StorageSettings};
//! use dictcache::dictionary::SimpleCacheDictionary;
//!
//! let settings = DictionarySettings::new(StorageSettings::new(
//!     100_000,
//!     Lifetime::from_secs(60, 120)?,
//! ));
//! let dictionary =
//!     SimpleCacheDictionary::with_settings("geo", schema, source, settings)?;
//!
//! let columns = dictionary.get_columns(&["region"], &key_columns, &[None])?;
//! ```

pub mod backoff;
pub mod columns;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod fetch;
pub mod key;
pub mod logging;
pub mod metrics;
pub mod schema;
pub mod source;
pub mod storage;
pub mod update;

pub use columns::{Column, ColumnKind, Value};
pub use dictionary::{CacheDictionary, ComplexCacheDictionary, SimpleCacheDictionary};
pub use error::DictionaryError;
pub use key::{ComplexKey, DictionaryKey};
pub use schema::{Attribute, KeyColumn, KeyLayout, Schema};
pub use source::{Block, BlockStream, MapSource, Source, SourceError};

/// Version of the dictcache library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
