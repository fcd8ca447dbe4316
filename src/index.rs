//! Ordered views over stored bundle metadata.
//!
//! A [`BundleIndex`] is fed by a storage through `attach()` and answers
//! selector queries in its own order. Selection stops after
//! [`BundleSelector::limit`] accepted entries and fails with
//! [`StoreError::NoBundleFound`] if nothing was accepted.
mod arrival;
mod priority;
mod selector;

pub use arrival::ArrivalIndex;
pub use priority::{PriorityIndex, priority_order};
pub use selector::{
    AllSelector, BundleSelector, DestinationSelector, ResultSink, SelectorError,
};

use crate::bundle::{BundleId, Eid, MetaBundle};
use crate::error::{Result, StoreError};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

pub trait BundleIndex: Send + Sync {
    /// Inserts `meta`; a bundle that is already indexed is left alone.
    fn add(&mut self, meta: &MetaBundle);

    fn remove(&mut self, id: &BundleId);

    fn clear(&mut self);

    /// Streams matching entries into `sink` in index order and returns how
    /// many were accepted.
    fn get(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize>;

    fn distinct_destinations(&self) -> BTreeSet<Eid>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience wrapper around [`get`](Self::get) collecting into a list.
    fn select(&self, selector: &dyn BundleSelector) -> Result<Vec<MetaBundle>> {
        let mut result = Vec::new();
        self.get(selector, &mut result)?;
        Ok(result)
    }
}

/// Handle under which an index is attached to a storage.
pub type SharedIndex = Arc<RwLock<dyn BundleIndex>>;

/// Runs `selector` over `candidates` in the order given.
pub(crate) fn scan<'a>(
    candidates: impl IntoIterator<Item = &'a MetaBundle>,
    selector: &dyn BundleSelector,
    sink: &mut dyn ResultSink,
) -> Result<usize> {
    let limit = selector.limit();
    let mut added = 0;

    for meta in candidates {
        if limit > 0 && added >= limit {
            break;
        }
        if selector.should_add(meta)? {
            sink.put(meta.clone());
            added += 1;
        }
    }

    if added == 0 {
        return Err(StoreError::NoBundleFound);
    }
    Ok(added)
}
