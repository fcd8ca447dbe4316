//! Bookkeeping shared by the storage backends.
use crate::bloom::{BloomFilter, BloomFilterConfig};
use crate::bundle::{BundleId, Eid, MetaBundle};
use crate::bundleset::BundleSet;
use crate::error::{Result, StoreError};
use crate::event::{EventSink, RemovalReason, StorageEvent};
use crate::index::{
    BundleIndex, BundleSelector, PriorityIndex, ResultSink, SharedIndex,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};

/// Byte quota. `max == 0` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quota {
    max: u64,
    current: u64,
}

impl Quota {
    pub fn new(max: u64) -> Self {
        Self { max, current: 0 }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Fails with `StorageFull` if `size` more bytes would exceed the quota.
    pub fn check(&self, size: u64) -> Result<()> {
        if self.max > 0 && self.current.saturating_add(size) > self.max {
            return Err(StoreError::StorageFull {
                required: size,
                available: self.max.saturating_sub(self.current),
            });
        }
        Ok(())
    }

    pub fn allocate(&mut self, size: u64) -> Result<()> {
        self.check(size)?;
        self.current = self.current.saturating_add(size);
        Ok(())
    }

    pub fn free(&mut self, size: u64) {
        self.current = self.current.saturating_sub(size);
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

/// Attached indices and event subscribers of one storage.
#[derive(Default)]
pub(crate) struct Observers {
    indices: Vec<SharedIndex>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Observers {
    /// Registers `index` and feeds it everything already stored.
    pub fn attach<'a>(
        &mut self,
        index: SharedIndex,
        existing: impl IntoIterator<Item = &'a MetaBundle>,
    ) {
        {
            let mut guard = index.write().unwrap_or_else(PoisonError::into_inner);
            for meta in existing {
                guard.add(meta);
            }
        }
        self.indices.push(index);
    }

    pub fn detach(&mut self, index: &SharedIndex) -> bool {
        let before = self.indices.len();
        self.indices.retain(|attached| !Arc::ptr_eq(attached, index));
        self.indices.len() != before
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn added(&self, meta: &MetaBundle) {
        for index in &self.indices {
            index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .add(meta);
        }
        self.notify(&StorageEvent::Added(meta.clone()));
    }

    pub fn removed(&self, meta: &MetaBundle, reason: RemovalReason) {
        for index in &self.indices {
            index
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(meta.id());
        }
        self.notify(&StorageEvent::Removed {
            meta: meta.clone(),
            reason,
        });
    }

    /// Empties every index and reports each dropped bundle as deleted.
    pub fn cleared<'a>(&self, removed: impl IntoIterator<Item = &'a MetaBundle>) {
        for index in &self.indices {
            index.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
        if self.sinks.is_empty() {
            return;
        }
        for meta in removed {
            self.notify(&StorageEvent::Removed {
                meta: meta.clone(),
                reason: RemovalReason::Deleted,
            });
        }
    }

    /// Selection through the first attached index, `None` if there is none.
    pub fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Option<Result<usize>> {
        let index = self.indices.first()?;
        let guard = index.read().unwrap_or_else(PoisonError::into_inner);
        Some(guard.get(selector, sink))
    }

    fn notify(&self, event: &StorageEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// In-memory metadata of the memory and disk backends: a bundle set for
/// membership, expiry and the Bloom summary, plus a priority index for
/// native scan order.
pub(crate) struct MetaStore {
    set: BundleSet,
    priority: PriorityIndex,
    sizes: HashMap<BundleId, u64>,
}

impl MetaStore {
    pub fn new(summary: &BloomFilterConfig) -> Result<Self> {
        Ok(Self {
            set: BundleSet::with_config(summary)?,
            priority: PriorityIndex::new(),
            sizes: HashMap::new(),
        })
    }

    pub fn contains(&self, id: &BundleId) -> bool {
        self.sizes.contains_key(id)
    }

    pub fn get(&self, id: &BundleId) -> Option<&MetaBundle> {
        self.set.get(id)
    }

    pub fn insert(&mut self, meta: MetaBundle, size: u64) {
        self.sizes.insert(meta.id().clone(), size);
        self.priority.add(&meta);
        self.set.add(meta);
    }

    pub fn remove(&mut self, id: &BundleId) -> Option<(MetaBundle, u64)> {
        let size = self.sizes.remove(id)?;
        self.priority.remove(id);
        let meta = self.set.remove(id)?;
        Some((meta, size))
    }

    /// Drops expired entries, returning them with their stored sizes.
    pub fn expire(&mut self, now: u64) -> Vec<(MetaBundle, u64)> {
        self.set
            .expire(now)
            .into_iter()
            .map(|meta| {
                self.priority.remove(meta.id());
                let size = self.sizes.remove(meta.id()).unwrap_or_default();
                (meta, size)
            })
            .collect()
    }

    pub fn clear(&mut self) -> Vec<MetaBundle> {
        let removed = self.set.iter().cloned().collect();
        self.set.clear();
        self.priority.clear();
        self.sizes.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Entries in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = &MetaBundle> {
        self.priority.iter()
    }

    pub fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        self.priority.get(selector, sink)
    }

    /// First entry, in scheduling order, that tests positive in `filter`.
    pub fn first_in(&self, filter: &BloomFilter) -> Option<BundleId> {
        self.iter()
            .find(|meta| filter.contains(meta.id().canonical().as_bytes()))
            .map(|meta| meta.id().clone())
    }

    pub fn distinct_destinations(&self) -> BTreeSet<Eid> {
        self.priority.distinct_destinations()
    }

    /// Rebuilds the filter first if removals left stale bits.
    pub fn summary(&mut self) -> &BloomFilter {
        self.set.filter()
    }
}
