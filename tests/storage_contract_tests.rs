//! Behaviour every storage backend shares, run once per backend.
mod common;

use common::test_utils::{TestDir, make_bundle};
use dtn_bundle_store::{
    AllSelector, ArrivalIndex, BloomFilter, Bundle, BundleId, BundleIndex,
    BundleStorage, DestinationSelector, DiskBundleStorage, DiskStorageConfigBuilder,
    Eid, EventLog, Expirable, MemoryBundleStorage, MetaBundle, ProcFlags,
    RedbBundleStorage, RedbStorageConfigBuilder, RemovalReason, SelectorError,
    SharedIndex, StorageConfigBuilder, StorageEvent, StoreError,
};
use std::sync::{Arc, RwLock};
use std::thread;

struct Harness {
    storage: Box<dyn BundleStorage>,
    _dir: TestDir,
}

impl std::ops::Deref for Harness {
    type Target = dyn BundleStorage;

    fn deref(&self) -> &Self::Target {
        self.storage.as_ref()
    }
}

fn memory(name: &str, max_bytes: u64) -> Harness {
    let config = StorageConfigBuilder::default()
        .max_bytes(max_bytes)
        .build()
        .unwrap();
    Harness {
        storage: Box::new(MemoryBundleStorage::new(config).unwrap()),
        _dir: TestDir::new(name),
    }
}

fn disk(name: &str, max_bytes: u64) -> Harness {
    let dir = TestDir::new(name);
    let config = DiskStorageConfigBuilder::default()
        .path(dir.path())
        .max_bytes(max_bytes)
        .build()
        .unwrap();
    Harness {
        storage: Box::new(DiskBundleStorage::open(config).unwrap()),
        _dir: dir,
    }
}

fn redb(name: &str, max_bytes: u64) -> Harness {
    let dir = TestDir::new(name);
    let config = RedbStorageConfigBuilder::default()
        .db_path(dir.file("bundles.redb"))
        .max_bytes(max_bytes)
        .build()
        .unwrap();
    Harness {
        storage: Box::new(RedbBundleStorage::open(config).unwrap()),
        _dir: dir,
    }
}

fn id(seq: u64) -> BundleId {
    BundleId::new("dtn://node-a/app", 1000, seq)
}

fn bundle(seq: u64) -> Bundle {
    make_bundle("dtn://node-a/app", 1000, seq, 3600, 100)
}

fn ids(metas: &[MetaBundle]) -> Vec<u64> {
    metas.iter().map(|m| m.id().sequence()).collect()
}

fn store_get_remove(s: Harness) {
    let b = bundle(1);
    s.store(&b).unwrap();
    s.wait();

    assert!(s.contains(b.id()));
    assert_eq!(s.count(), 1);
    assert_eq!(s.size(), b.encoded_len());
    assert_eq!(s.get(b.id()).unwrap(), b);
    assert_eq!(s.info(b.id()).unwrap().payload_length(), 100);

    let meta = s.remove(b.id()).unwrap();
    assert_eq!(meta.id(), b.id());
    s.wait();
    assert!(s.is_empty());
    assert_eq!(s.size(), 0);
    assert!(matches!(s.get(b.id()), Err(StoreError::NoBundleFound)));
    assert!(matches!(s.remove(b.id()), Err(StoreError::NoBundleFound)));
    assert!(matches!(s.info(b.id()), Err(StoreError::NoBundleFound)));
}

fn quota_rejects_then_accepts(factory: fn(&str, u64) -> Harness, name: &str) {
    let first = bundle(1);
    let second = bundle(2);
    assert_eq!(first.encoded_len(), second.encoded_len());

    let s = factory(name, first.encoded_len());
    s.store(&first).unwrap();
    let err = s.store(&second).unwrap_err();
    assert!(matches!(err, StoreError::StorageFull { available: 0, .. }));
    assert!(!s.contains(second.id()));
    assert_eq!(s.size(), first.encoded_len());

    s.remove(first.id()).unwrap();
    s.store(&second).unwrap();
    s.wait();
    assert_eq!(s.count(), 1);
    assert_eq!(s.get(second.id()).unwrap(), second);
}

fn thousand_bundles_expire(s: Harness) {
    for seq in 0..1000 {
        s.store(&make_bundle("dtn://node-a/app", 5000, seq, 20, 16))
            .unwrap();
    }
    s.wait();
    assert_eq!(s.count(), 1000);

    s.expire(5020);
    s.wait();
    assert_eq!(s.count(), 1000);

    s.expire(5021);
    s.wait();
    assert_eq!(s.count(), 0);
    assert_eq!(s.size(), 0);

    // a second sweep finds nothing left to do
    s.expire(5021);
    s.wait();
    assert_eq!(s.count(), 0);
}

fn duplicate_store_is_noop(s: Harness) {
    let log = Arc::new(EventLog::new());
    s.subscribe(log.clone());

    let b = bundle(1);
    s.store(&b).unwrap();
    s.store(&b).unwrap();
    s.wait();

    assert_eq!(s.count(), 1);
    assert_eq!(s.size(), b.encoded_len());
    assert_eq!(log.drain().len(), 1);
}

fn faulty_mode(s: Harness) {
    let kept = bundle(1);
    s.store(&kept).unwrap();
    s.wait();

    s.set_faulty(true);
    let rejected = bundle(2);
    match s.store(&rejected) {
        Ok(()) | Err(StoreError::Faulty) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
    s.wait();
    assert!(!s.contains(rejected.id()));

    assert!(matches!(s.get(kept.id()), Err(StoreError::BundleLoad(_))));
    assert!(!s.contains(kept.id()));
    assert_eq!(s.size(), 0);

    s.set_faulty(false);
    s.store(&rejected).unwrap();
    s.wait();
    assert_eq!(s.get(rejected.id()).unwrap(), rejected);
}

fn native_selection_order(s: Harness) {
    let mut low = bundle(1);
    low.net_priority = -1;
    let mut high = bundle(2);
    high.net_priority = 5;
    let expedited =
        bundle(3).with_flags(ProcFlags::default().with(ProcFlags::PRIORITY_BIT2));
    let mut short_lived = bundle(4);
    short_lived.lifetime = 10;
    let plain = bundle(5);
    for b in [&low, &high, &expedited, &short_lived, &plain] {
        s.store(b).unwrap();
    }
    s.wait();

    let mut all = Vec::new();
    assert_eq!(s.select(&AllSelector::default(), &mut all).unwrap(), 5);
    assert_eq!(ids(&all), vec![2, 3, 4, 5, 1]);

    let mut limited = Vec::new();
    assert_eq!(s.select(&AllSelector::new(2), &mut limited).unwrap(), 2);
    assert_eq!(ids(&limited), vec![2, 3]);

    let mut none = Vec::new();
    let nowhere = DestinationSelector::new("dtn://nowhere", 0);
    assert!(matches!(
        s.select(&nowhere, &mut none),
        Err(StoreError::NoBundleFound)
    ));

    let failing = |_: &MetaBundle| -> Result<bool, SelectorError> {
        Err(SelectorError("boom".into()))
    };
    assert!(matches!(
        s.select(&failing, &mut none),
        Err(StoreError::Selector(_))
    ));
}

fn attached_index(s: Harness) {
    s.store(&bundle(3)).unwrap();
    s.store(&bundle(1)).unwrap();

    let index: SharedIndex = Arc::new(RwLock::new(ArrivalIndex::new()));
    s.attach(index.clone());
    assert_eq!(index.read().unwrap().len(), 2);

    s.store(&bundle(2)).unwrap();
    s.remove(&id(1)).unwrap();
    s.wait();

    let mut selected = Vec::new();
    s.select(&AllSelector::default(), &mut selected).unwrap();
    assert_eq!(ids(&selected), vec![3, 2]);

    assert!(s.detach(&index));
    assert!(!s.detach(&index));
    s.store(&bundle(4)).unwrap();
    assert_eq!(index.read().unwrap().len(), 2);
}

fn destinations_and_purge(s: Harness) {
    let mut to_b = bundle(1);
    to_b.destination = Eid::new("dtn://node-b/app");
    let mut to_c = bundle(2);
    to_c.destination = Eid::new("dtn://node-c/app");
    let mut also_b = bundle(3);
    also_b.destination = Eid::new("dtn://node-b/app");
    for b in [&to_b, &to_c, &also_b] {
        s.store(b).unwrap();
    }
    s.wait();

    let destinations: Vec<String> = s
        .distinct_destinations()
        .iter()
        .map(|e| e.to_string())
        .collect();
    assert_eq!(destinations, vec!["dtn://node-b/app", "dtn://node-c/app"]);

    let mut peer = BloomFilter::default();
    peer.insert(id(2).canonical().as_bytes());
    let purged = s.remove_matching(&peer).unwrap();
    assert_eq!(purged.id(), &id(2));
    assert!(matches!(
        s.remove_matching(&peer),
        Err(StoreError::NoBundleFound)
    ));
    s.wait();
    assert_eq!(s.count(), 2);
}

fn events_follow_changes(s: Harness) {
    let log = Arc::new(EventLog::new());
    s.subscribe(log.clone());

    s.store(&bundle(1)).unwrap();
    s.store(&make_bundle("dtn://node-a/app", 1000, 2, 5, 10))
        .unwrap();
    s.store(&bundle(3)).unwrap();
    s.remove(&id(1)).unwrap();
    s.expire(1006);
    s.wait();
    s.clear().unwrap();
    s.wait();

    let events = log.drain();
    let summary: Vec<(u64, Option<RemovalReason>)> = events
        .iter()
        .map(|event| match event {
            StorageEvent::Added(meta) => (meta.id().sequence(), None),
            StorageEvent::Removed { meta, reason } => {
                (meta.id().sequence(), Some(*reason))
            }
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, None),
            (2, None),
            (3, None),
            (1, Some(RemovalReason::Deleted)),
            (2, Some(RemovalReason::Expired)),
            (3, Some(RemovalReason::Deleted)),
        ]
    );
    assert_eq!(s.count(), 0);
    assert_eq!(s.size(), 0);

    s.store(&bundle(1)).unwrap();
    s.wait();
    assert_eq!(s.count(), 1);
}

fn custody_hooks(s: Harness) {
    let local = Eid::new("dtn://local");
    let plain = MetaBundle::from(&bundle(1));
    assert_eq!(s.accept_custody(&plain, &local), None);

    let custody = MetaBundle::from(
        &bundle(2).with_flags(ProcFlags::default().with(ProcFlags::CUSTODY_REQUESTED)),
    );
    assert_eq!(s.accept_custody(&custody, &local), Some(local.clone()));
    s.release_custody(&local, custody.id());
}

fn concurrent_store_and_get(s: Harness) {
    let storage: &dyn BundleStorage = &*s;
    thread::scope(|scope| {
        for worker in 0..4u64 {
            scope.spawn(move || {
                for n in 0..50u64 {
                    let b = bundle(worker * 1000 + n);
                    storage.store(&b).unwrap();
                    assert_eq!(storage.get(b.id()).unwrap(), b);
                }
            });
        }
    });
    s.wait();
    assert_eq!(s.count(), 200);
    assert_eq!(s.size(), 200 * bundle(1).encoded_len());
}

macro_rules! storage_contract_tests {
    ($($backend:ident),* $(,)?) => {
        $(
            #[cfg(test)]
            mod $backend {
                use super::*;

                fn open(test: &str) -> Harness {
                    super::$backend(&format!("{}_{}", stringify!($backend), test), 0)
                }

                #[test]
                fn test_store_get_remove() {
                    store_get_remove(open("store_get_remove"));
                }

                #[test]
                fn test_quota_rejects_then_accepts() {
                    quota_rejects_then_accepts(
                        super::$backend,
                        concat!(stringify!($backend), "_quota"),
                    );
                }

                #[test]
                fn test_thousand_bundles_expire() {
                    thousand_bundles_expire(open("expire"));
                }

                #[test]
                fn test_duplicate_store_is_noop() {
                    duplicate_store_is_noop(open("duplicate"));
                }

                #[test]
                fn test_faulty_mode() {
                    faulty_mode(open("faulty"));
                }

                #[test]
                fn test_native_selection_order() {
                    native_selection_order(open("selection"));
                }

                #[test]
                fn test_attached_index() {
                    attached_index(open("index"));
                }

                #[test]
                fn test_destinations_and_purge() {
                    destinations_and_purge(open("purge"));
                }

                #[test]
                fn test_events_follow_changes() {
                    events_follow_changes(open("events"));
                }

                #[test]
                fn test_custody_hooks() {
                    custody_hooks(open("custody"));
                }

                #[test]
                fn test_concurrent_store_and_get() {
                    concurrent_store_and_get(open("concurrent"));
                }
            }
        )*
    };
}

storage_contract_tests!(memory, disk, redb);
