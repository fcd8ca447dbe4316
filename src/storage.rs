//! Bundle storage contract and its backends.
//!
//! Every backend tracks a byte quota, fans stores and removals out to the
//! attached [`BundleIndex`](crate::index::BundleIndex)es and reports changes
//! as [`StorageEvent`](crate::event::StorageEvent)s. Index updates, quota
//! changes and notifications of one operation happen under the same write
//! lock, so no reader ever sees half of an operation.
mod config;
mod bookkeeping;
pub mod disk;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;
mod worker;

pub use config::{
    DiskStorageConfig, DiskStorageConfigBuilder, DiskStorageConfigBuilderError,
    RedbStorageConfig, RedbStorageConfigBuilder, RedbStorageConfigBuilderError,
    StorageConfig, StorageConfigBuilder, StorageConfigBuilderError,
};
pub use bookkeeping::Quota;
pub use disk::DiskBundleStorage;
pub use memory::MemoryBundleStorage;
#[cfg(feature = "redb")]
pub use redb_store::RedbBundleStorage;

use crate::bloom::BloomFilter;
use crate::bundle::{Bundle, BundleId, Eid, MetaBundle};
use crate::error::Result;
use crate::event::EventSink;
use crate::expiry::Expirable;
use crate::index::{BundleSelector, ResultSink, SharedIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub trait BundleStorage: Expirable {
    /// Stores `bundle`. Fails with `StorageFull` before touching anything if
    /// the quota would be exceeded. Storing an id that is already present
    /// succeeds without effect.
    fn store(&self, bundle: &Bundle) -> Result<()>;

    /// Loads the full bundle. If its bytes are gone or corrupt the entry is
    /// removed and `BundleLoad` is returned.
    fn get(&self, id: &BundleId) -> Result<Bundle>;

    /// Metadata-only existence check.
    fn contains(&self, id: &BundleId) -> bool;

    fn info(&self, id: &BundleId) -> Result<MetaBundle>;

    fn remove(&self, id: &BundleId) -> Result<MetaBundle>;

    /// Removes the first bundle, in scheduling order, whose id tests
    /// positive in `filter` (a peer's summary of bundles it already has).
    fn remove_matching(&self, filter: &BloomFilter) -> Result<MetaBundle>;

    /// Streams bundles accepted by `selector` into `sink`, using the first
    /// attached index or a scan in scheduling order if none is attached.
    fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize>;

    fn distinct_destinations(&self) -> BTreeSet<Eid>;

    fn clear(&self) -> Result<()>;

    fn count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Bytes currently accounted against the quota.
    fn size(&self) -> u64;

    fn attach(&self, index: SharedIndex);

    fn detach(&self, index: &SharedIndex) -> bool;

    fn subscribe(&self, sink: Arc<dyn EventSink>);

    /// Endpoint that becomes custodian of `meta`, if custody was requested.
    fn accept_custody(&self, meta: &MetaBundle, local: &Eid) -> Option<Eid> {
        meta.custody_requested().then(|| local.clone())
    }

    fn release_custody(&self, custodian: &Eid, id: &BundleId) {
        debug!("Custody of {} released by {}", id, custodian);
    }

    /// While set, stores and loads fail.
    fn set_faulty(&self, faulty: bool);

    /// Blocks until deferred writes have drained.
    fn wait(&self) {}
}

/// Backends owning background workers.
pub trait Lifecycle {
    /// Stops accepting work, drains what is queued and joins the workers.
    fn shutdown(&self);

    fn is_running(&self) -> bool;
}
