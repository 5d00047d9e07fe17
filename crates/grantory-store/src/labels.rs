//! Label matching and validation.
//!
//! Filtering is an exact-match conjunction: an entity matches when every
//! filter key is present in its labels with the same value. An empty filter
//! matches everything. Collections per namespace are small, so selection is
//! a linear scan.

use crate::error::{StoreError, StoreResult};
use crate::types::{Labeled, Labels};

/// Whether `labels` contains every `key -> value` pair of `filter`.
pub fn matches(labels: &Labels, filter: &Labels) -> bool {
    filter
        .iter()
        .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
}

/// Select the entities whose labels satisfy `filter`, preserving input order.
pub fn select<'a, T, I>(entities: I, filter: &Labels) -> Vec<T>
where
    T: Labeled + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    entities
        .into_iter()
        .filter(|entity| matches(entity.labels(), filter))
        .cloned()
        .collect()
}

/// Reject label maps that cannot be stored.
pub fn validate(labels: &Labels) -> StoreResult<()> {
    if labels.keys().any(|key| key.is_empty()) {
        return Err(StoreError::InvalidInput("label keys must not be empty".to_string()));
    }
    Ok(())
}
