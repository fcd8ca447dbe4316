//! Disk backend: one file per bundle, metadata in RAM.
//!
//! Files are named by the SHA-256 digest of the bundle's canonical id and
//! hold its storage encoding. Writes and deletes are handed to a background
//! writer; until a write lands the bundle is served from a pending map.
//! Reopening a directory restores every readable file found there.
use super::bookkeeping::{MetaStore, Observers, Quota};
use super::worker::Worker;
use super::{BundleStorage, DiskStorageConfig, Lifecycle};
use crate::bloom::BloomFilter;
use crate::bundle::{Bundle, BundleId, Eid, MetaBundle, codec};
use crate::common::file_key;
use crate::error::{Result, StoreError};
use crate::event::{EventSink, RemovalReason};
use crate::expiry::Expirable;
use crate::index::{BundleSelector, ResultSink, SharedIndex};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

const TMP_EXTENSION: &str = "tmp";

enum Task {
    Write { id: BundleId, generation: u64 },
    Delete(BundleId),
    Purge,
}

struct DiskState {
    meta: MetaStore,
    /// Bundles whose write has not landed yet, tagged with the store call
    /// that queued them.
    pending: HashMap<BundleId, (u64, Bundle)>,
    generation: u64,
    quota: Quota,
    observers: Observers,
}

impl DiskState {
    fn remove(&mut self, id: &BundleId, reason: RemovalReason) -> Option<MetaBundle> {
        let (meta, size) = self.meta.remove(id)?;
        self.pending.remove(id);
        self.quota.free(size);
        self.observers.removed(&meta, reason);
        Some(meta)
    }

    fn is_current(&self, id: &BundleId, generation: u64) -> bool {
        matches!(self.pending.get(id), Some((current, _)) if *current == generation)
    }
}

struct Shared {
    path: PathBuf,
    state: RwLock<DiskState>,
    faulty: AtomicBool,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, DiskState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DiskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_for(&self, id: &BundleId) -> PathBuf {
        self.path.join(file_key(&id.canonical()))
    }

    fn load(&self, id: &BundleId) -> Result<Bundle> {
        let bytes = fs::read(self.file_for(id))?;
        let bundle = codec::decode(&bytes)?;
        if bundle.id() != id {
            return Err(StoreError::BundleLoad(format!(
                "file for {} holds {}",
                id,
                bundle.id()
            )));
        }
        Ok(bundle)
    }

    fn write_file(&self, bundle: &Bundle) -> Result<()> {
        if self.faulty.load(Ordering::Relaxed) {
            return Err(StoreError::Faulty);
        }
        let target = self.file_for(bundle.id());
        let tmp = target.with_extension(TMP_EXTENSION);
        fs::write(&tmp, codec::encode(bundle))?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn delete_file(&self, id: &BundleId) {
        match fs::remove_file(self.file_for(id)) {
            Ok(()) => debug!("Deleted file of bundle {}", id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to delete file of bundle {}: {}", id, e),
        }
    }

    fn purge(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn handle(&self, task: Task) {
        match task {
            Task::Write { id, generation } => self.complete_write(&id, generation),
            Task::Delete(id) => self.delete_file(&id),
            Task::Purge => match self.purge() {
                Ok(removed) => debug!("Purged {} bundle files", removed),
                Err(e) => error!("Failed to purge {}: {}", self.path.display(), e),
            },
        }
    }

    fn complete_write(&self, id: &BundleId, generation: u64) {
        let bundle = {
            let state = self.read();
            match state.pending.get(id) {
                Some((current, bundle)) if *current == generation => bundle.clone(),
                // removed, or stored again, before the writer got here
                _ => return,
            }
        };

        let result = self.write_file(&bundle);
        let mut state = self.write();
        let current = state.is_current(id, generation);
        match result {
            Ok(()) if current => {
                state.pending.remove(id);
            }
            Ok(()) => {
                drop(state);
                self.delete_file(id);
            }
            Err(e) if current => {
                warn!("Writing bundle {} failed, rolling back: {}", id, e);
                state.remove(id, RemovalReason::Depleted);
                drop(state);
                self.delete_file(id);
            }
            Err(e) => debug!("Discarded failed write of stale bundle {}: {}", id, e),
        }
    }

    /// Rebuilds metadata and quota from the files in the directory.
    fn restore(&self) -> Result<()> {
        let mut state = self.write();
        let (mut restored, mut dropped) = (0usize, 0usize);

        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let bundle = match fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| codec::decode(&bytes))
            {
                Ok(bundle) => bundle,
                Err(e) => {
                    warn!("Removing unreadable bundle file {}: {}", path.display(), e);
                    fs::remove_file(&path)?;
                    dropped += 1;
                    continue;
                }
            };

            let expected = self.file_for(bundle.id());
            if state.meta.contains(bundle.id()) {
                if path != expected {
                    fs::remove_file(&path)?;
                }
                continue;
            }
            if path != expected {
                if expected.exists() {
                    // the properly named copy is restored on its own
                    fs::remove_file(&path)?;
                    continue;
                }
                debug!("Renaming {} to {}", path.display(), expected.display());
                fs::rename(&path, &expected)?;
            }

            let size = bundle.encoded_len();
            if let Err(e) = state.quota.allocate(size) {
                warn!("Dropping restored bundle {}: {}", bundle.id(), e);
                fs::remove_file(&expected)?;
                dropped += 1;
                continue;
            }
            debug!("Restored bundle {}", bundle.id());
            state.meta.insert(MetaBundle::from(&bundle), size);
            restored += 1;
        }

        info!(
            "Restored {} bundles ({} bytes) from {}, dropped {}",
            restored,
            state.quota.current(),
            self.path.display(),
            dropped
        );
        Ok(())
    }
}

pub struct DiskBundleStorage {
    shared: Arc<Shared>,
    worker: Worker<Task>,
}

impl DiskBundleStorage {
    /// Opens the storage directory, creating it if needed.
    ///
    /// Unless `initialize` is set, every readable bundle file already there
    /// is restored; unreadable files are deleted.
    pub fn open(config: DiskStorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.path)?;

        let shared = Arc::new(Shared {
            path: config.path.clone(),
            state: RwLock::new(DiskState {
                meta: MetaStore::new(&config.summary)?,
                pending: HashMap::new(),
                generation: 0,
                quota: Quota::new(config.max_bytes),
                observers: Observers::default(),
            }),
            faulty: AtomicBool::new(false),
        });

        if config.initialize {
            let removed = shared.purge()?;
            info!("Initialized {}, removed {} files", config.path.display(), removed);
        } else {
            shared.restore()?;
        }

        let handler = Arc::clone(&shared);
        let worker = Worker::spawn("bundle-writer", config.write_buffer, move |task| {
            handler.handle(task)
        })?;

        Ok(Self { shared, worker })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Bloom filter over every stored bundle id, for exchange with peers.
    pub fn summary(&self) -> BloomFilter {
        self.shared.write().meta.summary().clone()
    }

    /// Deletes the file of a bundle whose metadata is already gone.
    fn discard(&self, id: BundleId) {
        if let Err(StoreError::ShuttingDown) = self.worker.push(Task::Delete(id.clone())) {
            self.shared.delete_file(&id);
        }
    }

    /// Drops a bundle that could not be loaded. Returns the error `get`
    /// reports for it.
    fn heal(&self, id: &BundleId, cause: &StoreError) -> StoreError {
        let removed = self.shared.write().remove(id, RemovalReason::Depleted);
        match removed {
            Some(_) => {
                warn!("Bundle {} could not be loaded, removed it: {}", id, cause);
                self.discard(id.clone());
                StoreError::BundleLoad(format!("{}: {}", id, cause))
            }
            None => StoreError::NoBundleFound,
        }
    }
}

impl BundleStorage for DiskBundleStorage {
    fn store(&self, bundle: &Bundle) -> Result<()> {
        if !self.worker.is_running() {
            return Err(StoreError::ShuttingDown);
        }
        let meta = MetaBundle::from(bundle);
        let size = bundle.encoded_len();
        let id = meta.id().clone();

        let generation = {
            let mut state = self.shared.write();
            if state.meta.contains(&id) {
                debug!("Bundle {} already stored", id);
                return Ok(());
            }
            state.quota.allocate(size)?;
            state.generation += 1;
            let generation = state.generation;
            state.pending.insert(id.clone(), (generation, bundle.clone()));
            state.meta.insert(meta.clone(), size);
            state.observers.added(&meta);
            generation
        };

        if let Err(e) = self.worker.push(Task::Write {
            id: id.clone(),
            generation,
        }) {
            let mut state = self.shared.write();
            if state.is_current(&id, generation) {
                state.remove(&id, RemovalReason::Depleted);
            }
            return Err(e);
        }
        debug!("Queued bundle {} ({} bytes)", id, size);
        Ok(())
    }

    fn get(&self, id: &BundleId) -> Result<Bundle> {
        {
            let state = self.shared.read();
            if !state.meta.contains(id) {
                return Err(StoreError::NoBundleFound);
            }
            if self.shared.faulty.load(Ordering::Relaxed) {
                drop(state);
                return Err(self.heal(id, &StoreError::Faulty));
            }
            if let Some((_, bundle)) = state.pending.get(id) {
                return Ok(bundle.clone());
            }
        }

        // pending entries are dropped only once their file is in place
        self.shared.load(id).map_err(|e| self.heal(id, &e))
    }

    fn contains(&self, id: &BundleId) -> bool {
        self.shared.read().meta.contains(id)
    }

    fn info(&self, id: &BundleId) -> Result<MetaBundle> {
        self.shared
            .read()
            .meta
            .get(id)
            .cloned()
            .ok_or(StoreError::NoBundleFound)
    }

    fn remove(&self, id: &BundleId) -> Result<MetaBundle> {
        let meta = self
            .shared
            .write()
            .remove(id, RemovalReason::Deleted)
            .ok_or(StoreError::NoBundleFound)?;
        self.discard(id.clone());
        Ok(meta)
    }

    fn remove_matching(&self, filter: &BloomFilter) -> Result<MetaBundle> {
        let meta = {
            let mut state = self.shared.write();
            let id = state.meta.first_in(filter).ok_or(StoreError::NoBundleFound)?;
            state
                .remove(&id, RemovalReason::Deleted)
                .ok_or(StoreError::NoBundleFound)?
        };
        self.discard(meta.id().clone());
        Ok(meta)
    }

    fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        let state = self.shared.read();
        match state.observers.select(selector, sink) {
            Some(result) => result,
            None => state.meta.select(selector, sink),
        }
    }

    fn distinct_destinations(&self) -> BTreeSet<Eid> {
        self.shared.read().meta.distinct_destinations()
    }

    fn clear(&self) -> Result<()> {
        let count = {
            let mut state = self.shared.write();
            let removed = state.meta.clear();
            state.pending.clear();
            state.quota.reset();
            state.observers.cleared(&removed);
            removed.len()
        };
        if let Err(StoreError::ShuttingDown) = self.worker.push(Task::Purge) {
            self.shared.purge()?;
        }
        info!("Cleared {} bundles", count);
        Ok(())
    }

    fn count(&self) -> usize {
        self.shared.read().meta.len()
    }

    fn size(&self) -> u64 {
        self.shared.read().quota.current()
    }

    fn attach(&self, index: SharedIndex) {
        let mut state = self.shared.write();
        let DiskState {
            meta, observers, ..
        } = &mut *state;
        observers.attach(index, meta.iter());
    }

    fn detach(&self, index: &SharedIndex) -> bool {
        self.shared.write().observers.detach(index)
    }

    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.shared.write().observers.subscribe(sink);
    }

    /// Deferred writes fail while set, so stores are accepted and then
    /// rolled back once the writer reaches them.
    fn set_faulty(&self, faulty: bool) {
        self.shared.faulty.store(faulty, Ordering::Relaxed);
    }

    fn wait(&self) {
        self.worker.wait();
    }
}

impl Expirable for DiskBundleStorage {
    fn expire(&self, now: u64) {
        let expired: Vec<BundleId> = {
            let mut state = self.shared.write();
            let expired = state.meta.expire(now);
            for (meta, size) in &expired {
                state.pending.remove(meta.id());
                state.quota.free(*size);
                state.observers.removed(meta, RemovalReason::Expired);
            }
            expired.into_iter().map(|(meta, _)| meta.id().clone()).collect()
        };
        if !expired.is_empty() {
            debug!("Expired {} bundles", expired.len());
        }
        for id in expired {
            self.discard(id);
        }
    }
}

impl Lifecycle for DiskBundleStorage {
    fn shutdown(&self) {
        self.worker.shutdown();
        info!("Disk storage at {} shut down", self.shared.path.display());
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}
