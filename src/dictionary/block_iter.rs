//! Bulk export of the currently cached keys.
//!
//! [`DictionaryBlockIter`] batches a snapshot of the cached keys and
//! materializes their attributes through the normal query pipeline. Fresh
//! batches complete from storage; a batch containing expired keys follows
//! the usual refresh rules.

use super::CacheDictionary;
use crate::error::DictionaryError;
use crate::fetch::FetchRequest;
use crate::key::DictionaryKey;
use crate::source::Block;
use crate::storage::SlotStorage;

/// Lazy block sequence over a snapshot of the cached keys.
///
/// Each block carries the key columns followed by the requested attribute
/// columns. Construct a fresh iterator to restart.
pub struct DictionaryBlockIter<K: DictionaryKey, S: SlotStorage<K> + 'static> {
    dictionary: CacheDictionary<K, S>,
    attribute_names: Vec<String>,
    keys: Vec<K>,
    batch_size: usize,
    position: usize,
}

impl<K: DictionaryKey, S: SlotStorage<K> + 'static> CacheDictionary<K, S> {
    /// Starts a block iteration over the currently cached keys.
    ///
    /// The snapshot is taken here; inserts after this call are not
    /// reflected.
    pub fn block_iterator(
        &self,
        attribute_names: &[&str],
        batch_size: usize,
    ) -> Result<DictionaryBlockIter<K, S>, DictionaryError> {
        if batch_size == 0 {
            return Err(DictionaryError::BufferTooSmall {
                what: "batch_size".to_string(),
            });
        }
        // Surface unknown attribute names now, not at the first batch.
        FetchRequest::new(self.schema(), attribute_names)?;

        Ok(DictionaryBlockIter {
            dictionary: self.clone(),
            attribute_names: attribute_names.iter().map(|s| s.to_string()).collect(),
            keys: self.cached_keys(),
            batch_size,
            position: 0,
        })
    }
}

impl<K: DictionaryKey, S: SlotStorage<K> + 'static> DictionaryBlockIter<K, S> {
    fn make_block(&self, batch: &[K]) -> Result<Block, DictionaryError> {
        let key_columns = K::to_columns(batch, self.dictionary.schema())?;
        let names: Vec<&str> = self.attribute_names.iter().map(String::as_str).collect();
        let defaults = vec![None; names.len()];
        let attribute_columns = self
            .dictionary
            .get_columns(&names, &key_columns, &defaults)?;

        let mut columns = key_columns;
        columns.extend(attribute_columns);
        Ok(Block::new(columns))
    }
}

impl<K: DictionaryKey, S: SlotStorage<K> + 'static> Iterator for DictionaryBlockIter<K, S> {
    type Item = Result<Block, DictionaryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.keys.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.keys.len());
        let batch = &self.keys[self.position..end];
        self.position = end;
        Some(self.make_block(batch))
    }
}
