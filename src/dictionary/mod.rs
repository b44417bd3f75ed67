//! The cache dictionary: query pipeline, merge logic, and the worker update
//! path.
//!
//! Queries classify their keys against the slot storage under the write
//! lock, decide between completing from storage, scheduling a background
//! refresh, or blocking on a synchronous update, and finally merge the three
//! value sources (cached, just-fetched, default) back into the caller's key
//! order.

mod block_iter;
mod hierarchy;

pub use block_iter::DictionaryBlockIter;
pub use hierarchy::HIERARCHY_MAX_DEPTH;

use crate::backoff::BackoffState;
use crate::columns::Column;
use crate::config::{DictionarySettings, UpdateQueueSettings};
use crate::error::DictionaryError;
use crate::fetch::{DefaultProvider, FetchRequest};
use crate::key::{ComplexKey, DictionaryKey, KeyKind, KeySelection};
use crate::metrics::{DictionaryMetrics, MetricsSnapshot};
use crate::schema::{KeyLayout, Schema};
use crate::source::Source;
use crate::storage::{LookupResult, MemorySlotStorage, SlotStorage};
use crate::update::{UpdateQueue, UpdateResult, UpdateUnit};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;
use tracing::warn;

/// Simple-key dictionary over in-memory slot storage.
pub type SimpleCacheDictionary = CacheDictionary<u64, MemorySlotStorage<u64>>;

/// Complex-key dictionary over in-memory slot storage.
pub type ComplexCacheDictionary = CacheDictionary<ComplexKey, MemorySlotStorage<ComplexKey>>;

/// A read-through cache over an external record source.
///
/// Cloning is cheap and shares the same storage, queue, and workers.
pub struct CacheDictionary<K: DictionaryKey, S: SlotStorage<K> + 'static> {
    core: Arc<DictionaryCore<K, S>>,
    update_queue: Arc<UpdateQueue<K>>,
}

impl<K: DictionaryKey, S: SlotStorage<K> + 'static> Clone for CacheDictionary<K, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            update_queue: Arc::clone(&self.update_queue),
        }
    }
}

/// State shared between queries and update workers.
struct DictionaryCore<K: DictionaryKey, S: SlotStorage<K>> {
    name: String,
    schema: Arc<Schema>,
    /// Source handle; the mutex serializes re-binds, not reads.
    source: Mutex<Arc<dyn Source>>,
    state: RwLock<CacheState<S>>,
    metrics: DictionaryMetrics,
    allow_read_expired_keys: bool,
    _key: PhantomData<fn() -> K>,
}

/// Everything guarded by the dictionary's reader-writer lock.
struct CacheState<S> {
    storage: S,
    backoff: BackoffState,
}

/// What a worker accumulated from one full source stream drain.
struct Fetched<K> {
    keys: Vec<K>,
    storage_columns: Vec<Column>,
    unit_columns: Vec<Column>,
    index: HashMap<K, usize>,
}

impl<K: DictionaryKey, S: SlotStorage<K> + 'static> CacheDictionary<K, S> {
    /// Creates a dictionary over the given storage and source.
    ///
    /// # Errors
    ///
    /// * the source does not support selective load
    /// * the schema's key layout does not match the key variant `K`
    /// * invalid queue settings (zero sizes, push timeout below the floor)
    pub fn new(
        name: impl Into<String>,
        schema: Arc<Schema>,
        source: Arc<dyn Source>,
        storage: S,
        queue_settings: UpdateQueueSettings,
        allow_read_expired_keys: bool,
    ) -> Result<Self, DictionaryError> {
        let name = name.into();
        queue_settings.validate()?;
        if !source.supports_selective_load() {
            return Err(DictionaryError::UnsupportedSource { name });
        }
        match (K::KIND, schema.key_layout()) {
            (KeyKind::Simple, KeyLayout::Simple) => {}
            (KeyKind::Complex, KeyLayout::Complex(_)) => {}
            (KeyKind::Simple, KeyLayout::Complex(_)) => {
                return Err(DictionaryError::BadConfiguration {
                    reason: format!(
                        "'key' is not supported for simple cache dictionary '{name}'"
                    ),
                })
            }
            (KeyKind::Complex, KeyLayout::Simple) => {
                return Err(DictionaryError::BadConfiguration {
                    reason: format!(
                        "'id' is not supported for complex-key cache dictionary '{name}'"
                    ),
                })
            }
        }

        let core = Arc::new(DictionaryCore {
            name: name.clone(),
            schema,
            source: Mutex::new(source),
            state: RwLock::new(CacheState {
                storage,
                backoff: BackoffState::new(),
            }),
            metrics: DictionaryMetrics::new(),
            allow_read_expired_keys,
            _key: PhantomData,
        });

        let weak = Arc::downgrade(&core);
        let closure_name = name.clone();
        let update_queue = Arc::new(UpdateQueue::new(
            name,
            queue_settings,
            Box::new(move |unit| match weak.upgrade() {
                Some(core) => core.update(unit),
                None => Err(DictionaryError::Shutdown {
                    name: closure_name.clone(),
                }),
            }),
        ));

        Ok(Self { core, update_queue })
    }

    /// Fetches the requested attributes for every key, in key order.
    ///
    /// Per key, the value comes from the slot storage when fresh, from the
    /// refresh when the key was absent or expired, and otherwise from the
    /// caller's default column (or the schema null sentinel when the default
    /// is `None`).
    pub fn get_columns(
        &self,
        attribute_names: &[&str],
        key_columns: &[Column],
        defaults: &[Option<Column>],
    ) -> Result<Vec<Column>, DictionaryError> {
        let core = &self.core;
        let keys = K::extract(key_columns, &core.schema)?;
        let request = FetchRequest::new(&core.schema, attribute_names)?;
        Self::check_defaults(&request, defaults, keys.len())?;

        let (mut lookup, in_key_order) = {
            let mut state = core.state.write().unwrap();
            let lookup = state.storage.lookup(&keys, &request);
            let in_key_order = state.storage.returns_in_key_order();
            (lookup, in_key_order)
        };

        let found = lookup.found_count();
        let expired = lookup.expired_count();
        let not_found = keys.len().saturating_sub(found + expired);
        core.metrics
            .record_lookup(found as u64, expired as u64, not_found as u64);

        if not_found == 0 && expired == 0 {
            // All keys fresh: complete from storage.
            let full = if in_key_order {
                lookup.fetched_columns
            } else {
                Self::reorder_by_keys(&keys, &request, &lookup)?
            };
            return Ok(request.filter_requested(full));
        }

        let unit = Self::make_unit(&mut lookup, key_columns, request.clone());

        if not_found == 0 && core.allow_read_expired_keys {
            // Expired only: serve stale values now, refresh in the background.
            self.update_queue.try_push(unit)?;
            let full = if in_key_order {
                lookup.fetched_columns
            } else {
                Self::reorder_by_keys(&keys, &request, &lookup)?
            };
            return Ok(request.filter_requested(full));
        }

        self.update_queue.try_push(Arc::clone(&unit))?;
        let update_result = self.update_queue.wait_for_finish(&unit)?;

        let providers = Self::default_providers(&request, defaults);
        let full = Self::merge_columns(
            &keys,
            &request,
            &lookup.fetched_columns,
            &lookup.found_index,
            &update_result,
            &providers,
        )?;
        Ok(request.filter_requested(full))
    }

    /// Fetches a single attribute; see [`get_columns`](Self::get_columns).
    pub fn get_column(
        &self,
        attribute_name: &str,
        key_columns: &[Column],
        default: Option<Column>,
    ) -> Result<Column, DictionaryError> {
        let mut columns = self.get_columns(&[attribute_name], key_columns, &[default])?;
        columns.pop().ok_or_else(|| DictionaryError::BadConfiguration {
            reason: format!("attribute '{attribute_name}' produced no column"),
        })
    }

    /// Reports, per key, whether the key exists in the dictionary.
    ///
    /// Follows the same update decision as [`get_columns`](Self::get_columns)
    /// with an empty attribute projection.
    pub fn has_keys(&self, key_columns: &[Column]) -> Result<Vec<bool>, DictionaryError> {
        let core = &self.core;
        let keys = K::extract(key_columns, &core.schema)?;
        let request = FetchRequest::new(&core.schema, &[])?;

        let mut lookup = {
            let mut state = core.state.write().unwrap();
            state.storage.lookup(&keys, &request)
        };

        let found = lookup.found_count();
        let expired = lookup.expired_count();
        let not_found = keys.len().saturating_sub(found + expired);
        core.metrics
            .record_lookup(found as u64, expired as u64, not_found as u64);

        if not_found == 0 && expired == 0 {
            return Ok(vec![true; keys.len()]);
        }

        let unit = Self::make_unit(&mut lookup, key_columns, request);

        if not_found == 0 && core.allow_read_expired_keys {
            self.update_queue.try_push(unit)?;
            return Ok(vec![true; keys.len()]);
        }

        self.update_queue.try_push(Arc::clone(&unit))?;
        let update_result = self.update_queue.wait_for_finish(&unit)?;

        Ok(keys
            .iter()
            .map(|key| {
                lookup.found_index.contains_key(key) || update_result.index.contains_key(key)
            })
            .collect())
    }

    /// Builds the update unit for this query's absent-or-expired keys.
    fn make_unit(
        lookup: &mut LookupResult<K>,
        key_columns: &[Column],
        request: FetchRequest,
    ) -> Arc<UpdateUnit<K>> {
        let refresh_keys = std::mem::take(&mut lookup.refresh_keys);
        match K::KIND {
            KeyKind::Simple => UpdateUnit::new(refresh_keys, request),
            KeyKind::Complex => UpdateUnit::with_selection(
                refresh_keys,
                KeySelection {
                    key_columns: key_columns.to_vec(),
                    rows: std::mem::take(&mut lookup.refresh_rows),
                },
                request,
            ),
        }
    }

    fn check_defaults(
        request: &FetchRequest,
        defaults: &[Option<Column>],
        key_count: usize,
    ) -> Result<(), DictionaryError> {
        if defaults.len() != request.requested_count() {
            return Err(DictionaryError::BadConfiguration {
                reason: format!(
                    "{} default columns supplied for {} requested attributes",
                    defaults.len(),
                    request.requested_count()
                ),
            });
        }
        for (default, &position) in defaults.iter().zip(request.requested_positions()) {
            let Some(column) = default else { continue };
            let attribute = &request.schema().attributes()[position];
            if column.kind() != attribute.kind {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "default column for attribute '{}' is {}, expected {}",
                        attribute.name,
                        column.kind(),
                        attribute.kind
                    ),
                });
            }
            if column.len() != key_count {
                return Err(DictionaryError::BadConfiguration {
                    reason: format!(
                        "default column for attribute '{}' has {} rows for {} keys",
                        attribute.name,
                        column.len(),
                        key_count
                    ),
                });
            }
        }
        Ok(())
    }

    /// Full-width providers: caller defaults at requested positions, schema
    /// null sentinels everywhere else.
    fn default_providers(
        request: &FetchRequest,
        defaults: &[Option<Column>],
    ) -> Vec<DefaultProvider> {
        let schema = request.schema();
        let mut providers: Vec<DefaultProvider> = schema
            .attributes()
            .iter()
            .map(|attribute| DefaultProvider::new(attribute.null_value.clone()))
            .collect();
        for (caller_index, &position) in request.requested_positions().iter().enumerate() {
            if let Some(column) = defaults.get(caller_index).cloned().flatten() {
                let null_value = schema.attributes()[position].null_value.clone();
                providers[position] = DefaultProvider::with_column(null_value, column);
            }
        }
        providers
    }

    /// Re-orders storage rows into input-key order, for storages that emit
    /// rows in internal-slot order.
    fn reorder_by_keys(
        keys: &[K],
        request: &FetchRequest,
        lookup: &LookupResult<K>,
    ) -> Result<Vec<Column>, DictionaryError> {
        let mut columns = request.make_result_columns();
        for (position, column) in columns.iter_mut().enumerate() {
            if !request.contains_index(position) {
                continue;
            }
            let fetched = &lookup.fetched_columns[position];
            for key in keys {
                let row = lookup
                    .expired_index
                    .get(key)
                    .or_else(|| lookup.found_index.get(key));
                if let Some(&row) = row {
                    column.push_from(fetched, row)?;
                }
            }
        }
        Ok(columns)
    }

    /// Merges storage rows, refresh rows, and defaults into input-key order.
    ///
    /// Precedence per key: found-in-storage > fetched-during-update >
    /// default.
    fn merge_columns(
        keys: &[K],
        request: &FetchRequest,
        storage_columns: &[Column],
        found_index: &HashMap<K, usize>,
        update_result: &UpdateResult<K>,
        providers: &[DefaultProvider],
    ) -> Result<Vec<Column>, DictionaryError> {
        let mut columns = request.make_result_columns();
        for (position, column) in columns.iter_mut().enumerate() {
            if !request.contains_index(position) {
                continue;
            }
            let from_storage = &storage_columns[position];
            let from_update = &update_result.columns[position];
            let provider = &providers[position];

            for (key_index, key) in keys.iter().enumerate() {
                if let Some(&row) = found_index.get(key) {
                    column.push_from(from_storage, row)?;
                } else if let Some(&row) = update_result.index.get(key) {
                    column.push_from(from_update, row)?;
                } else {
                    column.push(provider.value_at(key_index))?;
                }
            }
        }
        Ok(columns)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.core.schema
    }

    /// Number of currently occupied slots.
    pub fn element_count(&self) -> usize {
        self.core.state.read().unwrap().storage.len()
    }

    /// Configured slot capacity.
    pub fn capacity(&self) -> usize {
        self.core.state.read().unwrap().storage.capacity()
    }

    /// Approximate bytes held by slot data.
    pub fn bytes_allocated(&self) -> usize {
        self.core.state.read().unwrap().storage.bytes()
    }

    /// Occupancy in `[0, 1]`.
    pub fn load_factor(&self) -> f64 {
        let state = self.core.state.read().unwrap();
        let capacity = state.storage.capacity();
        if capacity == 0 {
            0.0
        } else {
            state.storage.len() as f64 / capacity as f64
        }
    }

    /// The last source failure, if the most recent update failed.
    pub fn last_error(&self) -> Option<DictionaryError> {
        self.core.state.read().unwrap().backoff.last_error().cloned()
    }

    /// End of the current backoff window, if one is open.
    pub fn backoff_end_time(&self) -> Option<SystemTime> {
        self.core.state.read().unwrap().backoff.backoff_end_time()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Snapshot of the currently cached keys.
    pub fn cached_keys(&self) -> Vec<K> {
        self.core.state.read().unwrap().storage.cached_keys()
    }

    /// The bound source handle.
    pub fn source(&self) -> Arc<dyn Source> {
        Arc::clone(&self.core.source.lock().unwrap())
    }

    /// Stops the update queue and waits for in-flight updates to finish.
    ///
    /// Also runs implicitly when the last clone drops.
    pub fn shutdown(&self) {
        self.update_queue.stop_and_wait();
    }
}

impl<K: DictionaryKey> CacheDictionary<K, MemorySlotStorage<K>> {
    /// Builds a dictionary with in-memory slot storage from one settings
    /// bundle (e.g. the output of [`crate::config::parse_str`]).
    pub fn with_settings(
        name: impl Into<String>,
        schema: Arc<Schema>,
        source: Arc<dyn Source>,
        settings: DictionarySettings,
    ) -> Result<Self, DictionaryError> {
        settings.validate()?;
        let storage = MemorySlotStorage::new(Arc::clone(&schema), settings.storage)?;
        Self::new(
            name,
            schema,
            source,
            storage,
            settings.queue,
            settings.allow_read_expired_keys,
        )
    }
}

impl<K: DictionaryKey, S: SlotStorage<K>> DictionaryCore<K, S> {
    /// Worker entry point: drive one update unit against the source.
    fn update(&self, unit: &Arc<UpdateUnit<K>>) -> Result<(), DictionaryError> {
        self.metrics
            .record_source_request(unit.keys().len() as u64);

        let now = SystemTime::now();
        {
            let state = self.state.read().unwrap();
            if let Some(retry_in) = state.backoff.suppressed_for(now) {
                return Err(DictionaryError::Backoff {
                    name: self.name.clone(),
                    error_count: state.backoff.error_count(),
                    retry_in,
                });
            }
        }

        // Re-binding the source is serialized; reads only need the clone.
        let source = Arc::clone(&self.source.lock().unwrap());

        match self.fetch_from_source(source.as_ref(), unit) {
            Ok(fetched) => {
                let inserted = {
                    let mut state = self.state.write().unwrap();
                    let inserted = state
                        .storage
                        .insert(&fetched.keys, &fetched.storage_columns);
                    if inserted.is_ok() {
                        state.backoff.record_success();
                    }
                    inserted
                };
                match inserted {
                    Ok(()) => {
                        self.metrics.record_source_result(fetched.keys.len() as u64);
                        unit.complete(UpdateResult {
                            columns: fetched.unit_columns,
                            index: fetched.index,
                        });
                        Ok(())
                    }
                    Err(error) => self.register_failure(error, now),
                }
            }
            Err(error) => self.register_failure(error, now),
        }
    }

    /// Drains the source stream fully, accumulating rows for the bulk
    /// storage insert and the unit's result columns. No locks are held
    /// across the stream reads.
    fn fetch_from_source(
        &self,
        source: &dyn Source,
        unit: &Arc<UpdateUnit<K>>,
    ) -> Result<Fetched<K>, DictionaryError> {
        let request = unit.request();
        let key_width = self.schema.key_width();
        let expected_width = key_width + self.schema.attribute_count();

        let mut stream = K::load(source, unit.keys(), unit.selection()).map_err(|error| {
            DictionaryError::UpdateFailed {
                name: self.name.clone(),
                message: error.to_string(),
            }
        })?;

        let mut fetched = Fetched {
            keys: Vec::new(),
            storage_columns: self.schema.make_empty_columns(),
            unit_columns: request.make_result_columns(),
            index: HashMap::new(),
        };
        let requested: HashSet<&K> = unit.keys().iter().collect();

        loop {
            let block = match stream.next_block() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(error) => {
                    return Err(DictionaryError::UpdateFailed {
                        name: self.name.clone(),
                        message: error.to_string(),
                    })
                }
            };
            if block.rows() == 0 {
                continue;
            }
            if block.width() != expected_width {
                return Err(DictionaryError::TypeMismatch {
                    reason: format!(
                        "source block has {} columns, schema expects {expected_width}",
                        block.width()
                    ),
                });
            }

            let (key_columns, attribute_columns) = block.columns.split_at(key_width);
            let block_keys = K::extract(key_columns, &self.schema)?;

            for (position, column) in attribute_columns.iter().enumerate() {
                for row in 0..block_keys.len() {
                    fetched.storage_columns[position].push_from(column, row)?;
                }
                if request.contains_index(position) {
                    for row in 0..block_keys.len() {
                        fetched.unit_columns[position].push_from(column, row)?;
                    }
                }
            }

            let base = fetched.keys.len();
            for (offset, key) in block_keys.iter().enumerate() {
                // Only keys this unit asked for enter the index.
                if requested.contains(key) {
                    fetched.index.insert(key.clone(), base + offset);
                }
            }
            fetched.keys.extend(block_keys);
        }

        Ok(fetched)
    }

    /// Advances the backoff window and converts the failure into the error
    /// waiters observe.
    fn register_failure(
        &self,
        error: DictionaryError,
        now: SystemTime,
    ) -> Result<(), DictionaryError> {
        let end = {
            let mut state = self.state.write().unwrap();
            state.backoff.record_failure(error.clone(), now)
        };
        self.metrics.record_update_error();
        warn!(
            dictionary = %self.name,
            error = %error,
            next_attempt_at = ?end,
            "could not update cache dictionary"
        );
        match error {
            wrapped @ DictionaryError::UpdateFailed { .. } => Err(wrapped),
            other => Err(DictionaryError::UpdateFailed {
                name: self.name.clone(),
                message: other.to_string(),
            }),
        }
    }
}
