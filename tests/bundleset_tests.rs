mod common;

use common::test_utils::{TestDir, make_meta};
use dtn_bundle_store::{
    BloomFilter, BloomFilterConfig, BundleId, BundleSet, BundleSetRegistry, ExpiryListener,
    MetaBundle, StoreError,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder(Mutex<Vec<BundleId>>);

impl ExpiryListener for Recorder {
    fn on_bundle_expired(&self, meta: &MetaBundle) {
        self.0.lock().unwrap().push(meta.id().clone());
    }
}

#[cfg(test)]
mod expiry_tests {
    use super::*;

    #[test]
    fn test_expiry_order_over_a_thousand_bundles() {
        let recorder = Arc::new(Recorder::default());
        let mut set = BundleSet::new().with_listener(recorder.clone());
        for seq in 0..1000 {
            set.add(make_meta(seq, 0, 50 + seq));
        }
        assert_eq!(set.len(), 1000);
        assert_eq!(set.next_expiry(), Some(50));

        let expired = set.expire(550);
        assert_eq!(expired.len(), 500);
        assert_eq!(set.len(), 500);
        assert!(
            expired
                .windows(2)
                .all(|w| w[0].expiretime() <= w[1].expiretime())
        );
        assert_eq!(recorder.0.lock().unwrap().len(), 500);

        for seq in 0..1000 {
            let id = BundleId::new("dtn://meta/app", 0, seq);
            assert_eq!(set.has(&id), seq >= 500, "seq {seq}");
        }

        set.expire(1050);
        assert!(set.is_empty());
        assert_eq!(recorder.0.lock().unwrap().len(), 1000);
    }

    #[test]
    fn test_expire_is_idempotent() {
        let mut set = BundleSet::new();
        for seq in 0..10 {
            set.add(make_meta(seq, 100, seq));
        }
        let first = set.expire(105);
        assert_eq!(first.len(), 5);
        assert!(set.expire(105).is_empty());
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_zero_clock_expires_nothing() {
        let mut set = BundleSet::new();
        set.add(make_meta(1, 0, 0));
        assert!(set.expire(0).is_empty());
        assert_eq!(set.len(), 1);
    }
}

#[cfg(test)]
mod summary_tests {
    use super::*;

    #[test]
    fn test_get_not_in_peer_summary() {
        let mut local = BundleSet::new();
        let mut peer = BloomFilter::default();
        for seq in 0..20 {
            let meta = make_meta(seq, 10, 1000);
            if seq % 2 == 0 {
                peer.insert(meta.id().canonical().as_bytes());
            }
            local.add(meta);
        }

        let missing = local.get_not_in(&peer);
        assert_eq!(missing.len(), 10);
        assert!(missing.iter().all(|m| m.id().sequence() % 2 == 1));
    }

    #[test]
    fn test_filter_grows_with_content() {
        let config = BloomFilterConfig {
            table_size: 1,
            table_size_max: 4096,
            ..Default::default()
        };
        let mut set = BundleSet::with_config(&config).unwrap();
        for seq in 0..300 {
            set.add(make_meta(seq, 10, 1000));
        }
        assert!(set.filter().size() > 1);
        for seq in 0..300 {
            assert!(set.has(&BundleId::new("dtn://meta/app", 10, seq)));
        }
    }

    #[test]
    fn test_summary_forgets_removed_bundles() {
        let mut set = BundleSet::new();
        for seq in 0..1000 {
            set.add(make_meta(seq, 10, 1000));
        }
        for seq in 0..900 {
            assert!(set.remove(&BundleId::new("dtn://meta/app", 10, seq)).is_some());
        }
        assert_eq!(set.len(), 100);

        let mut received = BundleSet::new();
        received.deserialize(&set.serialize()).unwrap();
        for seq in 900..1000 {
            assert!(received.has(&BundleId::new("dtn://meta/app", 10, seq)));
        }
        let lingering = (0..900)
            .filter(|seq| received.has(&BundleId::new("dtn://meta/app", 10, *seq)))
            .count();
        assert!(lingering < 10, "{lingering} removed ids still match");
    }

    #[test]
    fn test_deserialize_makes_set_inconsistent() {
        let mut source = BundleSet::new();
        for seq in 0..5 {
            source.add(make_meta(seq, 10, 1000));
        }
        let wire = source.serialize();
        assert_eq!(wire.len(), source.encoded_len());

        let mut received = BundleSet::new();
        received.add(make_meta(99, 10, 1000));
        assert_eq!(received.deserialize(&wire).unwrap(), wire.len());

        assert!(!received.is_consistent());
        assert!(received.is_empty());
        assert!(received.has(&BundleId::new("dtn://meta/app", 10, 3)));
        assert!(!received.has(&BundleId::new("dtn://meta/app", 10, 99)));

        received.clear();
        assert!(received.is_consistent());
    }

    #[test]
    fn test_failed_deserialize_leaves_set_alone() {
        let mut set = BundleSet::new();
        set.add(make_meta(1, 10, 1000));
        assert!(set.deserialize(&[0x85]).is_err());
        assert!(set.is_consistent());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_copy_and_assign() {
        let mut original = BundleSet::new();
        original.add(make_meta(1, 10, 1000));
        let copy = original.copy();
        original.add(make_meta(2, 10, 1000));
        assert_eq!(copy.len(), 1);

        let mut target = BundleSet::new();
        target.assign(&original);
        assert_eq!(target.len(), 2);
        assert_eq!(target.filter().table(), original.filter().table());
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_named_set_survives_reopen() {
        let dir = TestDir::new("registry_reopen");
        let registry = BundleSetRegistry::new(dir.path()).unwrap();
        {
            let mut set = registry.open("neighbours").unwrap();
            for seq in 0..10 {
                set.add(make_meta(seq, 10, 1000));
            }
            assert!(registry.is_open("neighbours"));
        }
        assert!(!registry.is_open("neighbours"));
        assert_eq!(registry.names().unwrap(), vec!["neighbours".to_string()]);

        let set = registry.open("neighbours").unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(set.name(), "neighbours");
        assert!(set.has(&BundleId::new("dtn://meta/app", 10, 7)));
        set.close().unwrap();
    }

    #[test]
    fn test_long_names_persist() {
        let dir = TestDir::new("registry_long_name");
        let registry = BundleSetRegistry::new(dir.path()).unwrap();
        let name = format!("dtn://{}/purge", "peer".repeat(100));
        {
            let mut set = registry.open(&name).unwrap();
            set.add(make_meta(3, 10, 1000));
            set.close().unwrap();
        }
        assert_eq!(registry.names().unwrap(), vec![name.clone()]);

        let set = registry.open(&name).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.has(&BundleId::new("dtn://meta/app", 10, 3)));
    }

    #[test]
    fn test_name_can_only_be_open_once() {
        let dir = TestDir::new("registry_once");
        let registry = BundleSetRegistry::new(dir.path()).unwrap();
        let first = registry.open("a").unwrap();
        assert!(matches!(registry.open("a"), Err(StoreError::Config(_))));
        assert!(matches!(registry.remove("a"), Err(StoreError::Config(_))));
        assert!(matches!(registry.open(""), Err(StoreError::Config(_))));
        drop(first);

        registry.remove("a").unwrap();
        assert!(registry.names().unwrap().is_empty());
    }

    #[test]
    fn test_inconsistent_set_keeps_received_filter() {
        let dir = TestDir::new("registry_inconsistent");
        let registry = BundleSetRegistry::new(dir.path()).unwrap();
        let mut peer = BundleSet::new();
        peer.add(make_meta(42, 10, 1000));
        {
            let mut set = registry.open("peer").unwrap();
            set.deserialize(&peer.serialize()).unwrap();
        }
        let set = registry.open("peer").unwrap();
        assert!(!set.is_consistent());
        assert!(set.has(&BundleId::new("dtn://meta/app", 10, 42)));
    }
}
