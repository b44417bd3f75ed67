//! Failure backoff for the source-update path.
//!
//! After a source failure, updates are suppressed for an exponentially
//! growing window with a small random jitter; a successful fetch resets the
//! counter and reopens the path immediately.

use crate::error::DictionaryError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, SystemTime};

/// First backoff window, in seconds.
pub const BACKOFF_INITIAL_SECS: u64 = 1;

/// Clamp for the backoff window, in seconds.
pub const BACKOFF_MAX_SECS: u64 = 120;

/// Jitter fraction added on top of the base window.
const BACKOFF_JITTER_FRACTION: f64 = 0.1;

/// Base (jitter-free) backoff window for the given consecutive error count.
///
/// Grows 1, 2, 4, 8, … seconds, clamped at [`BACKOFF_MAX_SECS`].
pub fn backoff_base(error_count: u64) -> Duration {
    let shift = error_count.saturating_sub(1).min(63) as u32;
    let secs = BACKOFF_INITIAL_SECS
        .checked_shl(shift)
        .unwrap_or(BACKOFF_MAX_SECS)
        .min(BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

/// Error counter and suppression deadline shared by all workers.
#[derive(Debug)]
pub struct BackoffState {
    error_count: u64,
    last_error: Option<DictionaryError>,
    backoff_end_time: Option<SystemTime>,
    rng: StdRng,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            error_count: 0,
            last_error: None,
            backoff_end_time: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// The most recent source failure, if the last update failed.
    pub fn last_error(&self) -> Option<&DictionaryError> {
        self.last_error.as_ref()
    }

    pub fn backoff_end_time(&self) -> Option<SystemTime> {
        self.backoff_end_time
    }

    /// Remaining suppression window at `now`, if one is open.
    pub fn suppressed_for(&self, now: SystemTime) -> Option<Duration> {
        let end = self.backoff_end_time?;
        end.duration_since(now).ok().filter(|d| !d.is_zero())
    }

    /// Clears the counter and the window after a successful fetch.
    pub fn record_success(&mut self) {
        self.error_count = 0;
        self.last_error = None;
        self.backoff_end_time = None;
    }

    /// Registers a failure and advances the suppression deadline.
    pub fn record_failure(&mut self, error: DictionaryError, now: SystemTime) -> SystemTime {
        self.error_count += 1;
        self.last_error = Some(error);

        let base = backoff_base(self.error_count);
        let jitter_ms = (base.as_millis() as f64 * BACKOFF_JITTER_FRACTION) as u64;
        let jitter = Duration::from_millis(if jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=jitter_ms)
        });

        let end = now + base + jitter;
        self.backoff_end_time = Some(end);
        end
    }
}
