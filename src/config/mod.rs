//! Configuration for dictionary cache instances.
//!
//! Settings are plain structs with defaults and `with_*` builders; the
//! [`parser`] submodule overlays values from an INI file onto those defaults
//! and enforces the construction-time rejections (zero capacities, the push
//! timeout floor, and options that are invalid for cache layouts).

mod parser;
mod settings;

pub use parser::{parse_ini, parse_str};
pub use settings::{
    DictionarySettings, Lifetime, StorageSettings, UpdateQueueSettings,
    DEFAULT_MAX_THREADS_FOR_UPDATES, DEFAULT_MAX_UPDATE_QUEUE_SIZE,
    DEFAULT_QUERY_WAIT_TIMEOUT_MS, DEFAULT_UPDATE_QUEUE_PUSH_TIMEOUT_MS,
    MIN_UPDATE_QUEUE_PUSH_TIMEOUT_MS,
};
