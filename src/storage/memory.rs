use super::bookkeeping::{MetaStore, Observers, Quota};
use super::{BundleStorage, StorageConfig};
use crate::bloom::BloomFilter;
use crate::bundle::{Bundle, BundleId, Eid, MetaBundle};
use crate::error::{Result, StoreError};
use crate::event::{EventSink, RemovalReason};
use crate::expiry::Expirable;
use crate::index::{BundleSelector, ResultSink, SharedIndex};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

struct MemoryState {
    meta: MetaStore,
    bundles: HashMap<BundleId, Bundle>,
    quota: Quota,
    observers: Observers,
}

impl MemoryState {
    fn remove(&mut self, id: &BundleId, reason: RemovalReason) -> Option<MetaBundle> {
        let (meta, size) = self.meta.remove(id)?;
        self.bundles.remove(id);
        self.quota.free(size);
        self.observers.removed(&meta, reason);
        Some(meta)
    }
}

/// Keeps bundles in RAM. Nothing survives the process.
pub struct MemoryBundleStorage {
    state: RwLock<MemoryState>,
    faulty: AtomicBool,
}

impl MemoryBundleStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: RwLock::new(MemoryState {
                meta: MetaStore::new(&config.summary)?,
                bundles: HashMap::new(),
                quota: Quota::new(config.max_bytes),
                observers: Observers::default(),
            }),
            faulty: AtomicBool::new(false),
        })
    }

    /// Storage without a quota.
    pub fn unlimited() -> Result<Self> {
        Self::new(StorageConfig::default())
    }

    /// Bloom filter over every stored bundle id, for exchange with peers.
    pub fn summary(&self) -> BloomFilter {
        self.write().meta.summary().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BundleStorage for MemoryBundleStorage {
    fn store(&self, bundle: &Bundle) -> Result<()> {
        if self.faulty.load(Ordering::Relaxed) {
            return Err(StoreError::Faulty);
        }
        let meta = MetaBundle::from(bundle);
        let size = bundle.encoded_len();

        let mut state = self.write();
        if state.meta.contains(meta.id()) {
            debug!("Bundle {} already stored", meta.id());
            return Ok(());
        }
        state.quota.allocate(size)?;
        state.bundles.insert(meta.id().clone(), bundle.clone());
        state.meta.insert(meta.clone(), size);
        state.observers.added(&meta);
        debug!("Stored bundle {} ({} bytes)", meta.id(), size);
        Ok(())
    }

    fn get(&self, id: &BundleId) -> Result<Bundle> {
        {
            let state = self.read();
            if !state.meta.contains(id) {
                return Err(StoreError::NoBundleFound);
            }
            if !self.faulty.load(Ordering::Relaxed) {
                if let Some(bundle) = state.bundles.get(id) {
                    return Ok(bundle.clone());
                }
            }
        }

        warn!("Bundle {} could not be loaded, removing it", id);
        self.write().remove(id, RemovalReason::Depleted);
        Err(StoreError::BundleLoad(id.to_string()))
    }

    fn contains(&self, id: &BundleId) -> bool {
        self.read().meta.contains(id)
    }

    fn info(&self, id: &BundleId) -> Result<MetaBundle> {
        self.read()
            .meta
            .get(id)
            .cloned()
            .ok_or(StoreError::NoBundleFound)
    }

    fn remove(&self, id: &BundleId) -> Result<MetaBundle> {
        self.write()
            .remove(id, RemovalReason::Deleted)
            .ok_or(StoreError::NoBundleFound)
    }

    fn remove_matching(&self, filter: &BloomFilter) -> Result<MetaBundle> {
        let mut state = self.write();
        let id = state.meta.first_in(filter).ok_or(StoreError::NoBundleFound)?;
        state
            .remove(&id, RemovalReason::Deleted)
            .ok_or(StoreError::NoBundleFound)
    }

    fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        let state = self.read();
        match state.observers.select(selector, sink) {
            Some(result) => result,
            None => state.meta.select(selector, sink),
        }
    }

    fn distinct_destinations(&self) -> BTreeSet<Eid> {
        self.read().meta.distinct_destinations()
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.write();
        let removed = state.meta.clear();
        state.bundles.clear();
        state.quota.reset();
        state.observers.cleared(&removed);
        info!("Cleared {} bundles", removed.len());
        Ok(())
    }

    fn count(&self) -> usize {
        self.read().meta.len()
    }

    fn size(&self) -> u64 {
        self.read().quota.current()
    }

    fn attach(&self, index: SharedIndex) {
        let mut state = self.write();
        let MemoryState {
            meta, observers, ..
        } = &mut *state;
        observers.attach(index, meta.iter());
    }

    fn detach(&self, index: &SharedIndex) -> bool {
        self.write().observers.detach(index)
    }

    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.write().observers.subscribe(sink);
    }

    fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::Relaxed);
    }
}

impl Expirable for MemoryBundleStorage {
    fn expire(&self, now: u64) {
        let mut state = self.write();
        let expired = state.meta.expire(now);
        for (meta, size) in &expired {
            state.bundles.remove(meta.id());
            state.quota.free(*size);
            state.observers.removed(meta, RemovalReason::Expired);
        }
        if !expired.is_empty() {
            debug!("Expired {} bundles", expired.len());
        }
    }
}
