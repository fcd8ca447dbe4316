use super::{BundleIndex, BundleSelector, ResultSink, scan};
use crate::bundle::{BundleId, Eid, MetaBundle};
use crate::error::Result;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Scheduling order: network priority and bundle priority descending, then
/// earliest expiry, then smallest data length, then bundle id.
pub fn priority_order(a: &MetaBundle, b: &MetaBundle) -> Ordering {
    b.net_priority()
        .cmp(&a.net_priority())
        .then_with(|| b.priority().cmp(&a.priority()))
        .then_with(|| a.expiretime().cmp(&b.expiretime()))
        .then_with(|| data_length(a).cmp(&data_length(b)))
        .then_with(|| a.id().cmp(b.id()))
}

/// Length of the whole application data unit for fragments, of the payload
/// otherwise.
fn data_length(meta: &MetaBundle) -> u64 {
    if meta.id().is_fragment() {
        meta.app_data_length()
    } else {
        meta.payload_length()
    }
}

#[derive(Clone, Debug)]
struct Entry(MetaBundle);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        priority_order(&self.0, &other.0)
    }
}

/// Index ordered by [`priority_order`].
#[derive(Debug, Default)]
pub struct PriorityIndex {
    entries: BTreeSet<Entry>,
    by_id: HashMap<BundleId, MetaBundle>,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaBundle> {
        self.entries.iter().map(|e| &e.0)
    }

    pub fn contains(&self, id: &BundleId) -> bool {
        self.by_id.contains_key(id)
    }
}

impl BundleIndex for PriorityIndex {
    fn add(&mut self, meta: &MetaBundle) {
        if self.by_id.contains_key(meta.id()) {
            return;
        }
        self.by_id.insert(meta.id().clone(), meta.clone());
        self.entries.insert(Entry(meta.clone()));
    }

    fn remove(&mut self, id: &BundleId) {
        if let Some(meta) = self.by_id.remove(id) {
            self.entries.remove(&Entry(meta));
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
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
        self.by_id.values().map(|m| m.destination().clone()).collect()
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleId, Priority, ProcFlags};
    use crate::error::StoreError;
    use crate::index::{AllSelector, SelectorError};

    fn meta(seq: u64, lifetime: u64) -> MetaBundle {
        MetaBundle::new(BundleId::new("dtn://src", 1000, seq), "dtn://dst", lifetime)
    }

    #[test]
    fn test_order_by_priorities_then_expiry() {
        let mut index = PriorityIndex::new();
        let low = meta(1, 10);
        let late = meta(2, 500);
        let expedited = meta(3, 900).with_flags(
            ProcFlags::default().with_priority(Priority::Expedited),
        );
        let network = meta(4, 900).with_net_priority(5);
        for m in [&low, &late, &expedited, &network] {
            index.add(m);
        }

        let ids: Vec<u64> = index.iter().map(|m| m.id().sequence()).collect();
        assert_eq!(ids, vec![4, 3, 1, 2]);
    }

    #[test]
    fn test_payload_length_and_id_break_ties() {
        let mut index = PriorityIndex::new();
        index.add(&meta(9, 10).with_payload_length(100));
        index.add(&meta(8, 10).with_payload_length(100));
        index.add(&meta(7, 10).with_payload_length(500));
        let ids: Vec<u64> = index.iter().map(|m| m.id().sequence()).collect();
        assert_eq!(ids, vec![8, 9, 7]);
    }

    #[test]
    fn test_fragments_compare_by_app_data_length() {
        let mut index = PriorityIndex::new();
        let fragment = |seq, app_data| {
            MetaBundle::new(BundleId::fragment("dtn://src", 1000, seq, 0), "dtn://dst", 10)
                .with_payload_length(10)
                .with_app_data_length(app_data)
        };
        index.add(&fragment(1, 5000));
        index.add(&meta(2, 10).with_payload_length(300));
        index.add(&fragment(3, 200));
        let ids: Vec<u64> = index.iter().map(|m| m.id().sequence()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_add_is_idempotent_and_remove_by_id() {
        let mut index = PriorityIndex::new();
        let m = meta(1, 10);
        index.add(&m);
        index.add(&m);
        assert_eq!(index.len(), 1);
        index.remove(m.id());
        assert!(index.is_empty());
        index.remove(m.id());
    }

    #[test]
    fn test_get_respects_limit() {
        let mut index = PriorityIndex::new();
        for seq in 0..10 {
            index.add(&meta(seq, 10 + seq));
        }
        let result = index.select(&AllSelector::new(3)).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].id().sequence(), 0);

        let all = index.select(&AllSelector::new(0)).unwrap();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_get_empty_is_not_found() {
        let index = PriorityIndex::new();
        assert!(matches!(
            index.select(&AllSelector::new(1)),
            Err(StoreError::NoBundleFound)
        ));
    }

    #[test]
    fn test_selector_error_aborts_scan() {
        let mut index = PriorityIndex::new();
        index.add(&meta(1, 10));
        let failing = |_: &MetaBundle| -> std::result::Result<bool, SelectorError> {
            Err(SelectorError("boom".into()))
        };
        match index.select(&failing) {
            Err(StoreError::Selector(err)) => assert_eq!(err.0, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
