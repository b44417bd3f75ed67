//! In-process counters for cache activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by queries and update workers.
#[derive(Debug, Default)]
pub struct DictionaryMetrics {
    queries: AtomicU64,
    keys_requested: AtomicU64,
    keys_found: AtomicU64,
    keys_expired: AtomicU64,
    keys_not_found: AtomicU64,
    source_requests: AtomicU64,
    source_keys_requested: AtomicU64,
    source_keys_found: AtomicU64,
    update_errors: AtomicU64,
}

impl DictionaryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one bulk lookup and its per-key classification counts.
    pub fn record_lookup(&self, found: u64, expired: u64, not_found: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.keys_requested
            .fetch_add(found + expired + not_found, Ordering::Relaxed);
        self.keys_found.fetch_add(found, Ordering::Relaxed);
        self.keys_expired.fetch_add(expired, Ordering::Relaxed);
        self.keys_not_found.fetch_add(not_found, Ordering::Relaxed);
    }

    /// Records one source round trip request of `keys` keys.
    pub fn record_source_request(&self, keys: u64) {
        self.source_requests.fetch_add(1, Ordering::Relaxed);
        self.source_keys_requested.fetch_add(keys, Ordering::Relaxed);
    }

    /// Records the rows a source round trip returned.
    pub fn record_source_result(&self, keys: u64) {
        self.source_keys_found.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn record_update_error(&self) {
        self.update_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            keys_requested: self.keys_requested.load(Ordering::Relaxed),
            keys_found: self.keys_found.load(Ordering::Relaxed),
            keys_expired: self.keys_expired.load(Ordering::Relaxed),
            keys_not_found: self.keys_not_found.load(Ordering::Relaxed),
            source_requests: self.source_requests.load(Ordering::Relaxed),
            source_keys_requested: self.source_keys_requested.load(Ordering::Relaxed),
            source_keys_found: self.source_keys_found.load(Ordering::Relaxed),
            update_errors: self.update_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`DictionaryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub keys_requested: u64,
    pub keys_found: u64,
    pub keys_expired: u64,
    pub keys_not_found: u64,
    pub source_requests: u64,
    pub source_keys_requested: u64,
    pub source_keys_found: u64,
    pub update_errors: u64,
}

impl MetricsSnapshot {
    /// Fraction of requested keys served fresh from the slot table.
    pub fn hit_rate(&self) -> f64 {
        if self.keys_requested == 0 {
            0.0
        } else {
            self.keys_found as f64 / self.keys_requested as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup_accumulates() {
        let metrics = DictionaryMetrics::new();
        metrics.record_lookup(2, 1, 1);
        metrics.record_lookup(4, 0, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.keys_requested, 8);
        assert_eq!(snapshot.keys_found, 6);
        assert_eq!(snapshot.keys_expired, 1);
        assert_eq!(snapshot.keys_not_found, 1);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = DictionaryMetrics::new();
        assert_eq!(metrics.snapshot().hit_rate(), 0.0);

        metrics.record_lookup(3, 0, 1);
        assert!((metrics.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_source_counters() {
        let metrics = DictionaryMetrics::new();
        metrics.record_source_request(5);
        metrics.record_source_result(3);
        metrics.record_update_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.source_requests, 1);
        assert_eq!(snapshot.source_keys_requested, 5);
        assert_eq!(snapshot.source_keys_found, 3);
        assert_eq!(snapshot.update_errors, 1);
    }
}
