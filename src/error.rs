//! Error types for the dictionary cache.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the dictionary cache core.
///
/// Configuration and schema errors are raised at construction and are fatal
/// to that cache instance. Per-query errors propagate to the caller of
/// [`get_columns`](crate::dictionary::CacheDictionary::get_columns) /
/// [`has_keys`](crate::dictionary::CacheDictionary::has_keys) and leave the
/// storage untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DictionaryError {
    /// The external source cannot be used behind a cache layout
    #[error("source for dictionary '{name}' does not support selective load")]
    UnsupportedSource { name: String },

    /// Invalid configuration detected at construction
    #[error("bad configuration: {reason}")]
    BadConfiguration { reason: String },

    /// A recognized configuration key carried an unusable value
    #[error("invalid value for [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A capacity-like setting was zero
    #[error("{what} cannot be zero")]
    BufferTooSmall { what: String },

    /// The update queue stayed full past the push timeout
    #[error("update queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// An update did not reach a terminal state within the wait timeout
    #[error("update did not finish within {timeout:?}")]
    WaitTimeout { timeout: Duration },

    /// A source fetch failed; the source error message is preserved
    #[error("update failed for dictionary '{name}': {message}")]
    UpdateFailed { name: String, message: String },

    /// The backoff window after a source failure is still open
    #[error(
        "update of dictionary '{name}' suppressed by backoff after {error_count} \
         consecutive errors, next attempt in {retry_in:?}"
    )]
    Backoff {
        name: String,
        error_count: u64,
        retry_in: Duration,
    },

    /// A value or column did not match the declared attribute type
    #[error("type mismatch: {reason}")]
    TypeMismatch { reason: String },

    /// The operation is not available for this key layout
    #[error("unsupported operation: {reason}")]
    Unsupported { reason: String },

    /// The update queue was stopped while the unit was still queued
    #[error("dictionary '{name}' update queue is shut down")]
    Shutdown { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_queue_full() {
        let err = DictionaryError::QueueFull { capacity: 1 };
        assert_eq!(err.to_string(), "update queue is full (capacity 1)");
    }

    #[test]
    fn test_error_display_backoff_mentions_count() {
        let err = DictionaryError::Backoff {
            name: "geo".to_string(),
            error_count: 3,
            retry_in: Duration::from_secs(4),
        };
        let message = err.to_string();
        assert!(message.contains("geo"));
        assert!(message.contains("3 consecutive errors"));
    }

    #[test]
    fn test_error_is_cloneable_for_multiple_waiters() {
        let err = DictionaryError::UpdateFailed {
            name: "geo".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(err.clone(), err);
    }
}
