//! Typed settings structs with defaults and validation.

use crate::error::DictionaryError;
use std::time::Duration;

/// Default update queue capacity.
pub const DEFAULT_MAX_UPDATE_QUEUE_SIZE: usize = 100_000;

/// Default number of update worker threads.
pub const DEFAULT_MAX_THREADS_FOR_UPDATES: usize = 4;

/// Default queue push timeout in milliseconds.
pub const DEFAULT_UPDATE_QUEUE_PUSH_TIMEOUT_MS: u64 = 10;

/// Contractual floor for the queue push timeout; smaller configured values
/// are rejected at construction.
pub const MIN_UPDATE_QUEUE_PUSH_TIMEOUT_MS: u64 = 10;

/// Default query wait timeout in milliseconds.
pub const DEFAULT_QUERY_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Slot lifetime range; deadlines are drawn uniformly from it at insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub min: Duration,
    pub max: Duration,
}

impl Lifetime {
    pub fn new(min: Duration, max: Duration) -> Result<Self, DictionaryError> {
        let lifetime = Self { min, max };
        lifetime.validate()?;
        Ok(lifetime)
    }

    /// Convenience constructor from whole seconds.
    pub fn from_secs(min: u64, max: u64) -> Result<Self, DictionaryError> {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        if self.max.is_zero() {
            return Err(DictionaryError::BufferTooSmall {
                what: "lifetime max".to_string(),
            });
        }
        if self.min > self.max {
            return Err(DictionaryError::BadConfiguration {
                reason: format!(
                    "lifetime min ({:?}) exceeds lifetime max ({:?})",
                    self.min, self.max
                ),
            });
        }
        Ok(())
    }
}

/// Slot storage settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    /// Slot table capacity; a strict upper bound on cached keys.
    pub size_in_cells: usize,
    /// Lifetime range for freshly written slots.
    pub lifetime: Lifetime,
    /// Window past the deadline in which a slot reads as expired rather
    /// than absent. Defaults to `lifetime.max`.
    pub strict_max_lifetime: Option<Duration>,
}

impl StorageSettings {
    pub fn new(size_in_cells: usize, lifetime: Lifetime) -> Self {
        Self {
            size_in_cells,
            lifetime,
            strict_max_lifetime: None,
        }
    }

    pub fn with_strict_max_lifetime(mut self, strict_max_lifetime: Duration) -> Self {
        self.strict_max_lifetime = Some(strict_max_lifetime);
        self
    }

    /// Effective strict-max-lifetime window.
    pub fn strict_max(&self) -> Duration {
        self.strict_max_lifetime.unwrap_or(self.lifetime.max)
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        if self.size_in_cells == 0 {
            return Err(DictionaryError::BufferTooSmall {
                what: "size_in_cells".to_string(),
            });
        }
        self.lifetime.validate()
    }
}

/// Update queue and worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateQueueSettings {
    pub max_update_queue_size: usize,
    pub max_threads_for_updates: usize,
    pub push_timeout: Duration,
    pub query_wait_timeout: Duration,
}

impl Default for UpdateQueueSettings {
    fn default() -> Self {
        Self {
            max_update_queue_size: DEFAULT_MAX_UPDATE_QUEUE_SIZE,
            max_threads_for_updates: DEFAULT_MAX_THREADS_FOR_UPDATES,
            push_timeout: Duration::from_millis(DEFAULT_UPDATE_QUEUE_PUSH_TIMEOUT_MS),
            query_wait_timeout: Duration::from_millis(DEFAULT_QUERY_WAIT_TIMEOUT_MS),
        }
    }
}

impl UpdateQueueSettings {
    pub fn with_max_update_queue_size(mut self, size: usize) -> Self {
        self.max_update_queue_size = size;
        self
    }

    pub fn with_max_threads_for_updates(mut self, threads: usize) -> Self {
        self.max_threads_for_updates = threads;
        self
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn with_query_wait_timeout(mut self, timeout: Duration) -> Self {
        self.query_wait_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        if self.max_update_queue_size == 0 {
            return Err(DictionaryError::BufferTooSmall {
                what: "max_update_queue_size".to_string(),
            });
        }
        if self.max_threads_for_updates == 0 {
            return Err(DictionaryError::BufferTooSmall {
                what: "max_threads_for_updates".to_string(),
            });
        }
        if self.push_timeout < Duration::from_millis(MIN_UPDATE_QUEUE_PUSH_TIMEOUT_MS) {
            return Err(DictionaryError::BadConfiguration {
                reason: format!(
                    "update_queue_push_timeout_milliseconds must be at least \
                     {MIN_UPDATE_QUEUE_PUSH_TIMEOUT_MS} ms, got {:?}",
                    self.push_timeout
                ),
            });
        }
        Ok(())
    }
}

/// Complete settings for one cache dictionary instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DictionarySettings {
    pub storage: StorageSettings,
    pub queue: UpdateQueueSettings,
    /// Enables the async-refresh branch for expired-only lookups.
    pub allow_read_expired_keys: bool,
}

impl DictionarySettings {
    pub fn new(storage: StorageSettings) -> Self {
        Self {
            storage,
            queue: UpdateQueueSettings::default(),
            allow_read_expired_keys: false,
        }
    }

    pub fn with_queue(mut self, queue: UpdateQueueSettings) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_allow_read_expired_keys(mut self, allow: bool) -> Self {
        self.allow_read_expired_keys = allow;
        self
    }

    pub fn validate(&self) -> Result<(), DictionaryError> {
        self.storage.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_validates_range() {
        assert!(Lifetime::from_secs(60, 120).is_ok());
        assert!(matches!(
            Lifetime::from_secs(120, 60),
            Err(DictionaryError::BadConfiguration { .. })
        ));
        assert!(matches!(
            Lifetime::from_secs(0, 0),
            Err(DictionaryError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_storage_settings_zero_cells_rejected() {
        let settings = StorageSettings::new(0, Lifetime::from_secs(1, 2).unwrap());
        assert!(matches!(
            settings.validate(),
            Err(DictionaryError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_storage_settings_strict_max_defaults_to_lifetime_max() {
        let settings = StorageSettings::new(10, Lifetime::from_secs(60, 120).unwrap());
        assert_eq!(settings.strict_max(), Duration::from_secs(120));

        let with_override = settings.with_strict_max_lifetime(Duration::from_secs(5));
        assert_eq!(with_override.strict_max(), Duration::from_secs(5));
    }

    #[test]
    fn test_queue_settings_defaults() {
        let settings = UpdateQueueSettings::default();
        assert_eq!(settings.max_update_queue_size, 100_000);
        assert_eq!(settings.max_threads_for_updates, 4);
        assert_eq!(settings.push_timeout, Duration::from_millis(10));
        assert_eq!(settings.query_wait_timeout, Duration::from_millis(60_000));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_queue_settings_push_timeout_floor() {
        let settings =
            UpdateQueueSettings::default().with_push_timeout(Duration::from_millis(5));
        assert!(matches!(
            settings.validate(),
            Err(DictionaryError::BadConfiguration { .. })
        ));
    }

    #[test]
    fn test_queue_settings_zero_values_rejected() {
        let zero_queue = UpdateQueueSettings::default().with_max_update_queue_size(0);
        assert!(zero_queue.validate().is_err());

        let zero_threads = UpdateQueueSettings::default().with_max_threads_for_updates(0);
        assert!(zero_threads.validate().is_err());
    }

    #[test]
    fn test_dictionary_settings_builder() {
        let settings =
            DictionarySettings::new(StorageSettings::new(4, Lifetime::from_secs(60, 120).unwrap()))
                .with_queue(UpdateQueueSettings::default().with_max_threads_for_updates(2))
                .with_allow_read_expired_keys(true);

        assert!(settings.allow_read_expired_keys);
        assert_eq!(settings.queue.max_threads_for_updates, 2);
        assert!(settings.validate().is_ok());
    }
}
