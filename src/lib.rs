//! Bundle storage engine for delay-tolerant networking nodes.
//!
//! The crate holds bundles (protocol data units keyed by source, creation
//! timestamp, sequence number and fragment offset) under a byte quota and
//! keeps them queryable while they wait for a contact.
//!
//! Building blocks:
//!    * [`BloomFilter`]: growable Bloom filter over a pluggable
//!      [`HashProvider`], with in-place AND/OR/XOR and an SDNV-framed wire
//!      form for exchanging summaries with peers.
//!    * [`BundleSet`]: expiry-ordered set of bundle metadata paired with a
//!      Bloom filter. Named sets persist through a [`BundleSetRegistry`].
//!    * [`index`]: ordered views (arrival, priority) answering selector
//!      queries, attachable to any storage.
//!    * [`storage`]: the [`BundleStorage`] contract with in-memory, disk and
//!      redb backends.
//!    * [`ExpirySweeper`]: background thread expiring bundles on a clock.
//!
//! Growing a Bloom filter discards its membership, so every owner of a
//! filter re-inserts its live items after a successful `grow`.
//! [`BundleSet`] does this for you.
//!
//! ```
//! use dtn_bundle_store::{Bundle, BundleId, BundleStorage, MemoryBundleStorage};
//!
//! let storage = MemoryBundleStorage::unlimited().unwrap();
//! let bundle = Bundle::new(BundleId::new("dtn://node-a/app", 1000, 1), "dtn://node-b/app")
//!     .with_lifetime(3600)
//!     .with_payload(&b"hello"[..]);
//! storage.store(&bundle).unwrap();
//! assert_eq!(storage.get(bundle.id()).unwrap(), bundle);
//! ```

pub mod bloom;
pub mod bundle;
pub mod bundleset;
pub mod common;
mod error;
pub mod event;
pub mod expiry;
pub mod hash;
pub mod index;
pub mod sdnv;
pub mod storage;

pub use bloom::{BloomError, BloomFilter, BloomFilterConfig, BloomFilterConfigBuilder};
pub use bundle::{Block, Bundle, BundleId, Eid, MetaBundle, Priority, ProcFlags};
pub use bundleset::{BundleSet, BundleSetRegistry, ExpiryListener, NamedBundleSet};
pub use error::{Result, StoreError};
pub use event::{EventLog, EventSink, RemovalReason, StorageEvent};
pub use expiry::{Clock, DtnClock, Expirable, ExpirySweeper, ManualClock};
pub use hash::{DoubleHashProvider, HashProvider, SaltedHashProvider};
pub use index::{
    AllSelector, ArrivalIndex, BundleIndex, BundleSelector, DestinationSelector,
    PriorityIndex, ResultSink, SelectorError, SharedIndex,
};
pub use storage::{
    BundleStorage, DiskBundleStorage, DiskStorageConfig, DiskStorageConfigBuilder,
    Lifecycle, MemoryBundleStorage, Quota, StorageConfig, StorageConfigBuilder,
};
#[cfg(feature = "redb")]
pub use storage::{RedbBundleStorage, RedbStorageConfig, RedbStorageConfigBuilder};
