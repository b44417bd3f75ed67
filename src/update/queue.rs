//! Bounded update queue with a pool of long-running worker threads.
//!
//! Queries push units with a bounded timeout and optionally block on them;
//! workers dequeue, claim, and drive the update callback. Shutdown is
//! cooperative: pushes stop, workers finish their current unit and exit,
//! still-queued units fail with a shutdown error.

use super::unit::UpdateUnit;
use crate::config::UpdateQueueSettings;
use crate::error::DictionaryError;
use crate::key::DictionaryKey;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Update callback driven by worker threads.
///
/// On success the callback has already completed the unit; on error the
/// worker fails the unit with the returned error.
pub type UpdateFn<K> =
    dyn Fn(&Arc<UpdateUnit<K>>) -> Result<(), DictionaryError> + Send + Sync;

/// Bounded work queue + worker pool for update units.
pub struct UpdateQueue<K: DictionaryKey> {
    name: String,
    settings: UpdateQueueSettings,
    shared: Arc<QueueShared<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct QueueShared<K: DictionaryKey> {
    state: Mutex<QueueState<K>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    update: Box<UpdateFn<K>>,
}

struct QueueState<K: DictionaryKey> {
    queue: VecDeque<Arc<UpdateUnit<K>>>,
    finished: bool,
}

impl<K: DictionaryKey> UpdateQueue<K> {
    /// Starts the worker pool. `settings` must already be validated.
    pub fn new(
        name: impl Into<String>,
        settings: UpdateQueueSettings,
        update: Box<UpdateFn<K>>,
    ) -> Self {
        let name = name.into();
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                finished: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: settings.max_update_queue_size,
            update,
        });

        let workers = (0..settings.max_threads_for_updates)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("{name}-update-{index}"))
                    .spawn(move || Self::worker_loop(shared))
                    .expect("Failed to spawn update worker thread")
            })
            .collect();

        info!(
            queue = %name,
            threads = settings.max_threads_for_updates,
            capacity = settings.max_update_queue_size,
            "update queue started"
        );

        Self {
            name,
            settings,
            shared,
            workers: Mutex::new(workers),
        }
    }

    fn worker_loop(shared: Arc<QueueShared<K>>) {
        loop {
            let unit = {
                let mut state = shared.state.lock().unwrap();
                loop {
                    if state.finished {
                        return;
                    }
                    if let Some(unit) = state.queue.pop_front() {
                        shared.not_full.notify_one();
                        break unit;
                    }
                    state = shared.not_empty.wait(state).unwrap();
                }
            };

            // A unit that failed during shutdown is already terminal; skip it.
            if !unit.mark_running() {
                continue;
            }
            if let Err(error) = (shared.update)(&unit) {
                debug!(error = %error, "update unit failed");
                unit.fail(error);
            }
        }
    }

    /// Enqueues a unit, waiting up to the configured push timeout for space.
    pub fn try_push(&self, unit: Arc<UpdateUnit<K>>) -> Result<(), DictionaryError> {
        let deadline = Instant::now() + self.settings.push_timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.finished {
                return Err(DictionaryError::Shutdown {
                    name: self.name.clone(),
                });
            }
            if state.queue.len() < self.shared.capacity {
                state.queue.push_back(unit);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DictionaryError::QueueFull {
                    capacity: self.shared.capacity,
                });
            }
            let (guard, _) = self
                .shared
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// Blocks until the unit reaches a terminal state, up to the configured
    /// query wait timeout.
    pub fn wait_for_finish(
        &self,
        unit: &Arc<UpdateUnit<K>>,
    ) -> Result<super::UpdateResult<K>, DictionaryError> {
        unit.wait(self.settings.query_wait_timeout)
    }

    /// Units currently queued (not yet claimed by a worker).
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting pushes, fails still-queued units, and waits for
    /// in-flight units to reach a terminal state.
    pub fn stop_and_wait(&self) {
        let drained: Vec<Arc<UpdateUnit<K>>> = {
            let mut state = self.shared.state.lock().unwrap();
            if state.finished {
                Vec::new()
            } else {
                state.finished = true;
                state.queue.drain(..).collect()
            }
        };
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        if !drained.is_empty() {
            warn!(
                queue = %self.name,
                dropped = drained.len(),
                "failing queued update units at shutdown"
            );
        }
        for unit in drained {
            unit.fail(DictionaryError::Shutdown {
                name: self.name.clone(),
            });
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!(queue = %self.name, "update worker panicked");
            }
        }
        info!(queue = %self.name, "update queue stopped");
    }
}

impl<K: DictionaryKey> Drop for UpdateQueue<K> {
    fn drop(&mut self) {
        self.stop_and_wait();
    }
}
