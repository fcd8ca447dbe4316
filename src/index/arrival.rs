use super::{BundleIndex, BundleSelector, ResultSink, scan};
use crate::bundle::{BundleId, Eid, MetaBundle};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index that hands bundles out in the order they were added.
#[derive(Debug, Default)]
pub struct ArrivalIndex {
    next: u64,
    order: BTreeMap<u64, MetaBundle>,
    by_id: HashMap<BundleId, u64>,
}

impl ArrivalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaBundle> {
        self.order.values()
    }
}

impl BundleIndex for ArrivalIndex {
    fn add(&mut self, meta: &MetaBundle) {
        if self.by_id.contains_key(meta.id()) {
            return;
        }
        let slot = self.next;
        self.next += 1;
        self.by_id.insert(meta.id().clone(), slot);
        self.order.insert(slot, meta.clone());
    }

    fn remove(&mut self, id: &BundleId) {
        if let Some(slot) = self.by_id.remove(id) {
            self.order.remove(&slot);
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.by_id.clear();
    }

    fn get(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        scan(self.iter(), selector, sink)
    }

    fn distinct_destinations(&self) -> BTreeSet<Eid> {
        self.order.values().map(|m| m.destination().clone()).collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}
