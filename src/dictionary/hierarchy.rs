//! Hierarchy primitives for simple-key dictionaries.
//!
//! The parent link lives in the hierarchical attribute; ancestor searches
//! iterate `to_parent` with a depth bound, short-circuiting on null parents,
//! ancestor matches, and self-parent loops. Complex-key dictionaries have no
//! hierarchy surface (these methods only exist for `u64` keys).

use super::CacheDictionary;
use crate::columns::Column;
use crate::error::DictionaryError;
use crate::storage::SlotStorage;

/// Iteration bound for ancestor searches.
pub const HIERARCHY_MAX_DEPTH: usize = 1000;

impl<S: SlotStorage<u64> + 'static> CacheDictionary<u64, S> {
    /// Maps every child key to its parent through the hierarchical
    /// attribute, running the normal query path (absent keys are fetched).
    pub fn to_parent(&self, children: &[u64]) -> Result<Vec<u64>, DictionaryError> {
        let attribute_name = {
            let (_, attribute) =
                self.schema()
                    .hierarchical_attribute()
                    .ok_or_else(|| DictionaryError::Unsupported {
                        reason: format!(
                            "dictionary '{}' has no hierarchical attribute",
                            self.name()
                        ),
                    })?;
            attribute.name.clone()
        };

        let column = self.get_column(
            &attribute_name,
            &[Column::UInt64(children.to_vec())],
            None,
        )?;
        column
            .as_u64_slice()
            .map(|parents| parents.to_vec())
            .ok_or_else(|| DictionaryError::TypeMismatch {
                reason: format!("hierarchical attribute '{attribute_name}' must be UInt64"),
            })
    }

    /// For each `(child, ancestor)` pair, reports whether `ancestor` is on
    /// the child's parent chain.
    pub fn is_in(&self, children: &[u64], ancestors: &[u64]) -> Result<Vec<bool>, DictionaryError> {
        if children.len() != ancestors.len() {
            return Err(DictionaryError::BadConfiguration {
                reason: format!(
                    "{} children for {} ancestors",
                    children.len(),
                    ancestors.len()
                ),
            });
        }
        self.is_in_impl(children, |index| ancestors[index])
    }

    /// Reports, per child, whether `ancestor` is on its parent chain.
    pub fn is_in_constant(
        &self,
        children: &[u64],
        ancestor: u64,
    ) -> Result<Vec<bool>, DictionaryError> {
        self.is_in_impl(children, |_| ancestor)
    }

    /// Transforms children to parents until the ancestor or the null value
    /// is reached, at most [`HIERARCHY_MAX_DEPTH`] steps deep.
    fn is_in_impl(
        &self,
        children: &[u64],
        ancestor_at: impl Fn(usize) -> u64,
    ) -> Result<Vec<bool>, DictionaryError> {
        let null_value = {
            let (_, attribute) =
                self.schema()
                    .hierarchical_attribute()
                    .ok_or_else(|| DictionaryError::Unsupported {
                        reason: format!(
                            "dictionary '{}' has no hierarchical attribute",
                            self.name()
                        ),
                    })?;
            // The schema guarantees a UInt64 hierarchical attribute.
            attribute.null_value.as_u64().unwrap_or(0)
        };

        let mut out: Vec<Option<bool>> = vec![None; children.len()];
        // Unresolved output positions and the frontier key whose parent we
        // query next, kept aligned.
        let mut pending: Vec<usize> = (0..children.len()).collect();
        let mut frontier: Vec<u64> = children.to_vec();

        for _ in 0..HIERARCHY_MAX_DEPTH {
            if pending.is_empty() {
                break;
            }
            let parents = self.to_parent(&frontier)?;

            let mut next_pending = Vec::new();
            let mut next_frontier = Vec::new();
            for (slot, &parent) in parents.iter().enumerate() {
                let position = pending[slot];
                if parent == null_value {
                    out[position] = Some(false);
                } else if parent == ancestor_at(position) {
                    out[position] = Some(true);
                } else if parent == frontier[slot] {
                    // Loop detected
                    out[position] = Some(true);
                } else {
                    next_pending.push(position);
                    next_frontier.push(parent);
                }
            }
            pending = next_pending;
            frontier = next_frontier;
        }

        Ok(out.into_iter().map(|o| o.unwrap_or(false)).collect())
    }
}
