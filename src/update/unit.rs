//! One-shot update units: the rendezvous between queries and workers.
//!
//! A unit is born per query, carried into the queue by the submitting query
//! and out of it by a worker. The state machine moves pending → running
//! exactly once, then running → succeeded/failed exactly once; the terminal
//! state is broadcast to every waiter.

use crate::columns::Column;
use crate::error::DictionaryError;
use crate::fetch::FetchRequest;
use crate::key::{DictionaryKey, KeySelection};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle state of an update unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Queued, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker; the source fetch is in flight.
    Running,
    /// The fetch finished and results are available.
    Succeeded,
    /// The fetch failed; the error is available.
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }
}

/// What a successful update hands back to its waiters.
#[derive(Debug, Clone)]
pub struct UpdateResult<K> {
    /// Full-schema-width columns; requested positions are populated.
    pub columns: Vec<Column>,
    /// Requested keys the source returned → row in `columns`.
    pub index: HashMap<K, usize>,
}

/// A single refresh request and its eventual result or error.
pub struct UpdateUnit<K: DictionaryKey> {
    keys: Vec<K>,
    selection: Option<KeySelection>,
    request: FetchRequest,
    shared: Mutex<Shared<K>>,
    done: Condvar,
}

struct Shared<K> {
    state: UnitState,
    result: Option<UpdateResult<K>>,
    error: Option<DictionaryError>,
}

impl<K: DictionaryKey> UpdateUnit<K> {
    /// Creates a unit for simple keys.
    pub fn new(keys: Vec<K>, request: FetchRequest) -> Arc<Self> {
        Self::build(keys, None, request)
    }

    /// Creates a unit that carries the caller's key columns and row
    /// selection for a complex-key source fetch.
    pub fn with_selection(
        keys: Vec<K>,
        selection: KeySelection,
        request: FetchRequest,
    ) -> Arc<Self> {
        Self::build(keys, Some(selection), request)
    }

    fn build(keys: Vec<K>, selection: Option<KeySelection>, request: FetchRequest) -> Arc<Self> {
        Arc::new(Self {
            keys,
            selection,
            request,
            shared: Mutex::new(Shared {
                state: UnitState::Pending,
                result: None,
                error: None,
            }),
            done: Condvar::new(),
        })
    }

    /// The keys this refresh must fetch.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn selection(&self) -> Option<&KeySelection> {
        self.selection.as_ref()
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> UnitState {
        self.shared.lock().unwrap().state
    }

    /// Claims the unit for a worker. Returns false if the unit already
    /// reached a terminal state (e.g. failed during shutdown).
    pub(crate) fn mark_running(&self) -> bool {
        let mut shared = self.shared.lock().unwrap();
        if shared.state == UnitState::Pending {
            shared.state = UnitState::Running;
            true
        } else {
            false
        }
    }

    /// Publishes the fetched columns and index map, waking all waiters.
    pub(crate) fn complete(&self, result: UpdateResult<K>) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state.is_terminal() {
            return;
        }
        shared.state = UnitState::Succeeded;
        shared.result = Some(result);
        drop(shared);
        self.done.notify_all();
    }

    /// Publishes a failure, waking all waiters.
    pub(crate) fn fail(&self, error: DictionaryError) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state.is_terminal() {
            return;
        }
        shared.state = UnitState::Failed;
        shared.error = Some(error);
        drop(shared);
        self.done.notify_all();
    }

    /// Blocks until the unit reaches a terminal state or `timeout` elapses.
    ///
    /// Every waiter observes the same outcome: the result is cloned out on
    /// success, the captured error re-raised on failure.
    pub fn wait(&self, timeout: Duration) -> Result<UpdateResult<K>, DictionaryError> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock().unwrap();
        while !shared.state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Err(DictionaryError::WaitTimeout { timeout });
            }
            let (guard, wait_result) = self
                .done
                .wait_timeout(shared, deadline - now)
                .unwrap();
            shared = guard;
            if wait_result.timed_out() && !shared.state.is_terminal() {
                return Err(DictionaryError::WaitTimeout { timeout });
            }
        }
        match shared.state {
            UnitState::Succeeded => Ok(shared
                .result
                .clone()
                .unwrap_or_else(|| UpdateResult {
                    columns: self.request.make_result_columns(),
                    index: HashMap::new(),
                })),
            _ => Err(shared.error.clone().unwrap_or_else(|| {
                DictionaryError::UpdateFailed {
                    name: String::new(),
                    message: "update unit failed without an error".to_string(),
                }
            })),
        }
    }
}
