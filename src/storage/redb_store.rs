//! Transactional backend on top of redb.
//!
//! Metadata rows, encoded bundles and an expiry index live in one database
//! file, and every mutation commits in a single write transaction. Expiry
//! sweeps and compaction are queued on a maintenance worker.
use super::bookkeeping::{Observers, Quota};
use super::worker::Worker;
use super::{BundleStorage, Lifecycle, RedbStorageConfig};
use crate::bloom::BloomFilter;
use crate::bundle::{Bundle, BundleId, Eid, MetaBundle, codec};
use crate::error::{Result, StoreError};
use crate::event::{EventSink, RemovalReason};
use crate::expiry::Expirable;
use crate::index::{self, BundleSelector, ResultSink, SharedIndex, priority_order};
use bincode::{Decode, Encode};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

const BUNDLES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("bundles");
const PAYLOADS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("payloads");
const EXPIRY_TABLE: TableDefinition<(u64, &str), ()> = TableDefinition::new("expiry");
const PROPERTIES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("properties");

const CONFIG_KEY: &str = "config";

#[derive(Encode, Decode)]
struct BundleRow {
    meta: MetaBundle,
    size: u64,
}

enum Task {
    Expire(u64),
    Compact,
}

struct RedbState {
    db: Database,
    quota: Quota,
    observers: Observers,
}

struct Shared {
    path: PathBuf,
    state: RwLock<RedbState>,
    faulty: AtomicBool,
}

fn decode_row(bytes: &[u8]) -> Result<BundleRow> {
    let (row, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(row)
}

fn row(db: &Database, key: &str) -> Result<Option<BundleRow>> {
    let txn = db.begin_read().map_err(redb::Error::from)?;
    let table = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
    let Some(bytes) = table.get(key).map_err(redb::Error::from)? else {
        return Ok(None);
    };
    Ok(Some(decode_row(bytes.value())?))
}

fn rows(db: &Database) -> Result<Vec<BundleRow>> {
    let txn = db.begin_read().map_err(redb::Error::from)?;
    let table = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
    let mut rows = Vec::new();
    for entry in table.iter().map_err(redb::Error::from)? {
        let (_, value) = entry.map_err(redb::Error::from)?;
        rows.push(decode_row(value.value())?);
    }
    Ok(rows)
}

/// Every stored entry in scheduling order.
fn metas(db: &Database) -> Result<Vec<MetaBundle>> {
    let mut metas: Vec<MetaBundle> = rows(db)?.into_iter().map(|r| r.meta).collect();
    metas.sort_by(priority_order);
    Ok(metas)
}

fn load(db: &Database, id: &BundleId) -> Result<Bundle> {
    let key = id.canonical();
    let txn = db.begin_read().map_err(redb::Error::from)?;
    let table = txn.open_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
    let bytes = table
        .get(key.as_str())
        .map_err(redb::Error::from)?
        .ok_or_else(|| StoreError::BundleLoad(format!("no data stored for {}", id)))?;
    let bundle = codec::decode(bytes.value())?;
    if bundle.id() != id {
        return Err(StoreError::BundleLoad(format!(
            "row for {} holds {}",
            id,
            bundle.id()
        )));
    }
    Ok(bundle)
}

fn delete_rows(db: &Database, metas: &[MetaBundle]) -> Result<()> {
    let txn = db.begin_write().map_err(redb::Error::from)?;
    {
        let mut bundles = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
        let mut payloads = txn.open_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
        let mut expiry = txn.open_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
        for meta in metas {
            let key = meta.id().canonical();
            bundles.remove(key.as_str()).map_err(redb::Error::from)?;
            payloads.remove(key.as_str()).map_err(redb::Error::from)?;
            expiry
                .remove((meta.expiretime(), key.as_str()))
                .map_err(redb::Error::from)?;
        }
    }
    txn.commit().map_err(redb::Error::from)?;
    Ok(())
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, RedbState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RedbState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(
        state: &mut RedbState,
        id: &BundleId,
        reason: RemovalReason,
    ) -> Result<Option<MetaBundle>> {
        let Some(row) = row(&state.db, &id.canonical())? else {
            return Ok(None);
        };
        delete_rows(&state.db, std::slice::from_ref(&row.meta))?;
        state.quota.free(row.size);
        state.observers.removed(&row.meta, reason);
        Ok(Some(row.meta))
    }

    fn expire(&self, now: u64) -> Result<usize> {
        let mut state = self.write();

        let keys: Vec<String> = {
            let txn = state.db.begin_read().map_err(redb::Error::from)?;
            let table = txn.open_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
            let mut keys = Vec::new();
            for entry in table.range(..(now, "")).map_err(redb::Error::from)? {
                let (key, _) = entry.map_err(redb::Error::from)?;
                keys.push(key.value().1.to_string());
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }

        let mut expired = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(row) = row(&state.db, key)? {
                expired.push(row);
            }
        }
        let metas: Vec<MetaBundle> = expired.iter().map(|r| r.meta.clone()).collect();
        delete_rows(&state.db, &metas)?;

        for row in &expired {
            state.quota.free(row.size);
            state.observers.removed(&row.meta, RemovalReason::Expired);
        }
        debug!("Expired {} bundles", expired.len());
        Ok(expired.len())
    }

    fn compact(&self) -> Result<bool> {
        let mut state = self.write();
        let compacted = state.db.compact().map_err(redb::Error::from)?;
        debug!("Compacted {} ({})", self.path.display(), compacted);
        Ok(compacted)
    }

    fn handle(&self, task: Task) {
        match task {
            Task::Expire(now) => {
                if let Err(e) = self.expire(now) {
                    error!("Expiry sweep of {} failed: {}", self.path.display(), e);
                }
            }
            Task::Compact => {
                if let Err(e) = self.compact() {
                    error!("Compaction of {} failed: {}", self.path.display(), e);
                }
            }
        }
    }
}

pub struct RedbBundleStorage {
    shared: Arc<Shared>,
    worker: Worker<Task>,
}

impl RedbBundleStorage {
    /// Opens or creates the database file and recomputes the quota from the
    /// stored rows. Rows beyond the quota are dropped.
    pub fn open(config: RedbStorageConfig) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&config.db_path).map_err(redb::Error::from)?;
        let txn = db.begin_write().map_err(redb::Error::from)?;
        {
            if config.initialize {
                txn.delete_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
                txn.delete_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
                txn.delete_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
            }
            txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
            txn.open_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
            txn.open_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
            let mut properties =
                txn.open_table(PROPERTIES_TABLE).map_err(redb::Error::from)?;
            properties
                .insert(CONFIG_KEY, config.to_bytes()?.as_slice())
                .map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;

        let mut quota = Quota::new(config.max_bytes);
        let mut dropped = Vec::new();
        for row in rows(&db)? {
            if quota.allocate(row.size).is_err() {
                dropped.push(row.meta);
            }
        }
        if !dropped.is_empty() {
            warn!("Dropping {} bundles beyond the quota", dropped.len());
            delete_rows(&db, &dropped)?;
        }
        info!(
            "Opened {} holding {} bytes",
            config.db_path.display(),
            quota.current()
        );

        let shared = Arc::new(Shared {
            path: config.db_path.clone(),
            state: RwLock::new(RedbState {
                db,
                quota,
                observers: Observers::default(),
            }),
            faulty: AtomicBool::new(false),
        });

        let handler = Arc::clone(&shared);
        let worker = Worker::spawn("bundle-maintenance", 0, move |task| {
            handler.handle(task)
        })?;

        Ok(Self { shared, worker })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Configuration recorded by the last `open`.
    pub fn stored_config(&self) -> Result<Option<RedbStorageConfig>> {
        let state = self.shared.read();
        let txn = state.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(PROPERTIES_TABLE).map_err(redb::Error::from)?;
        match table.get(CONFIG_KEY).map_err(redb::Error::from)? {
            Some(bytes) => Ok(Some(RedbStorageConfig::from_bytes(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Compacts the database file now.
    pub fn compact(&self) -> Result<bool> {
        self.shared.compact()
    }

    /// Marks the node idle. Entering the idle state queues a compaction.
    pub fn set_idle(&self, idle: bool) -> Result<()> {
        if idle {
            self.worker.push(Task::Compact)?;
        }
        Ok(())
    }
}

impl BundleStorage for RedbBundleStorage {
    fn store(&self, bundle: &Bundle) -> Result<()> {
        if self.shared.faulty.load(Ordering::Relaxed) {
            return Err(StoreError::Faulty);
        }
        let meta = MetaBundle::from(bundle);
        let size = bundle.encoded_len();
        let key = meta.id().canonical();
        let row = bincode::encode_to_vec(
            &BundleRow {
                meta: meta.clone(),
                size,
            },
            bincode::config::standard(),
        )?;
        let data = codec::encode(bundle);

        let mut state = self.shared.write();
        if row_exists(&state.db, &key)? {
            debug!("Bundle {} already stored", meta.id());
            return Ok(());
        }
        state.quota.check(size)?;

        let txn = state.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut bundles = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
            let mut payloads =
                txn.open_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
            let mut expiry = txn.open_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
            bundles
                .insert(key.as_str(), row.as_slice())
                .map_err(redb::Error::from)?;
            payloads
                .insert(key.as_str(), data.as_slice())
                .map_err(redb::Error::from)?;
            expiry
                .insert((meta.expiretime(), key.as_str()), ())
                .map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;

        state.quota.allocate(size)?;
        state.observers.added(&meta);
        debug!("Stored bundle {} ({} bytes)", meta.id(), size);
        Ok(())
    }

    fn get(&self, id: &BundleId) -> Result<Bundle> {
        let cause = {
            let state = self.shared.read();
            if !row_exists(&state.db, &id.canonical())? {
                return Err(StoreError::NoBundleFound);
            }
            if self.shared.faulty.load(Ordering::Relaxed) {
                StoreError::Faulty
            } else {
                match load(&state.db, id) {
                    Ok(bundle) => return Ok(bundle),
                    Err(e) => e,
                }
            }
        };

        let mut state = self.shared.write();
        match Shared::remove(&mut state, id, RemovalReason::Depleted)? {
            Some(_) => {
                warn!("Bundle {} could not be loaded, removed it: {}", id, cause);
                Err(StoreError::BundleLoad(format!("{}: {}", id, cause)))
            }
            None => Err(StoreError::NoBundleFound),
        }
    }

    fn contains(&self, id: &BundleId) -> bool {
        row_exists(&self.shared.read().db, &id.canonical()).unwrap_or_else(|e| {
            error!("Lookup of {} failed: {}", id, e);
            false
        })
    }

    fn info(&self, id: &BundleId) -> Result<MetaBundle> {
        row(&self.shared.read().db, &id.canonical())?
            .map(|row| row.meta)
            .ok_or(StoreError::NoBundleFound)
    }

    fn remove(&self, id: &BundleId) -> Result<MetaBundle> {
        let mut state = self.shared.write();
        Shared::remove(&mut state, id, RemovalReason::Deleted)?
            .ok_or(StoreError::NoBundleFound)
    }

    fn remove_matching(&self, filter: &BloomFilter) -> Result<MetaBundle> {
        let mut state = self.shared.write();
        let id = metas(&state.db)?
            .into_iter()
            .find(|meta| filter.contains(meta.id().canonical().as_bytes()))
            .map(|meta| meta.id().clone())
            .ok_or(StoreError::NoBundleFound)?;
        Shared::remove(&mut state, &id, RemovalReason::Deleted)?
            .ok_or(StoreError::NoBundleFound)
    }

    fn select(
        &self,
        selector: &dyn BundleSelector,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        let state = self.shared.read();
        if let Some(result) = state.observers.select(selector, sink) {
            return result;
        }
        index::scan(&metas(&state.db)?, selector, sink)
    }

    fn distinct_destinations(&self) -> BTreeSet<Eid> {
        match rows(&self.shared.read().db) {
            Ok(rows) => rows.into_iter().map(|r| r.meta.destination().clone()).collect(),
            Err(e) => {
                error!("Scan of {} failed: {}", self.shared.path.display(), e);
                BTreeSet::new()
            }
        }
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.shared.write();
        let removed = metas(&state.db)?;

        let txn = state.db.begin_write().map_err(redb::Error::from)?;
        txn.delete_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
        txn.delete_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
        txn.delete_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
        txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
        txn.open_table(PAYLOADS_TABLE).map_err(redb::Error::from)?;
        txn.open_table(EXPIRY_TABLE).map_err(redb::Error::from)?;
        txn.commit().map_err(redb::Error::from)?;

        state.quota.reset();
        state.observers.cleared(&removed);
        info!("Cleared {} bundles", removed.len());
        Ok(())
    }

    fn count(&self) -> usize {
        let state = self.shared.read();
        let count = || -> Result<u64> {
            let txn = state.db.begin_read().map_err(redb::Error::from)?;
            let table = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
            let len = table.len().map_err(redb::Error::from)?;
            Ok(len)
        };
        match count() {
            Ok(count) => count as usize,
            Err(e) => {
                error!("Count of {} failed: {}", self.shared.path.display(), e);
                0
            }
        }
    }

    fn size(&self) -> u64 {
        self.shared.read().quota.current()
    }

    fn attach(&self, index: SharedIndex) {
        let mut state = self.shared.write();
        let existing = metas(&state.db).unwrap_or_else(|e| {
            error!("Scan of {} failed: {}", self.shared.path.display(), e);
            Vec::new()
        });
        state.observers.attach(index, &existing);
    }

    fn detach(&self, index: &SharedIndex) -> bool {
        self.shared.write().observers.detach(index)
    }

    fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.shared.write().observers.subscribe(sink);
    }

    fn set_faulty(&self, faulty: bool) {
        self.shared.faulty.store(faulty, Ordering::Relaxed);
    }

    fn wait(&self) {
        self.worker.wait();
    }
}

fn row_exists(db: &Database, key: &str) -> Result<bool> {
    let txn = db.begin_read().map_err(redb::Error::from)?;
    let table = txn.open_table(BUNDLES_TABLE).map_err(redb::Error::from)?;
    Ok(table.get(key).map_err(redb::Error::from)?.is_some())
}

/// Queues a sweep on the maintenance worker; call [`wait`](BundleStorage::wait)
/// to observe its effect.
impl Expirable for RedbBundleStorage {
    fn expire(&self, now: u64) {
        if let Err(StoreError::ShuttingDown) = self.worker.push(Task::Expire(now)) {
            if let Err(e) = self.shared.expire(now) {
                error!("Expiry sweep of {} failed: {}", self.shared.path.display(), e);
            }
        }
    }
}

impl Lifecycle for RedbBundleStorage {
    fn shutdown(&self) {
        self.worker.shutdown();
        info!("Redb storage at {} shut down", self.shared.path.display());
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorageConfigBuilder;

    fn temp_db(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "dtn-redb-{}-{}-{}.redb",
            tag,
            std::process::id(),
            rand::random::<u32>()
        ))
    }

    #[test]
    fn test_expiry_index_drives_sweep() {
        let path = temp_db("sweep");
        let storage = RedbBundleStorage::open(
            RedbStorageConfigBuilder::default()
                .db_path(path.clone())
                .build()
                .unwrap(),
        )
        .unwrap();

        for (seq, lifetime) in [(1, 10), (2, 20), (3, 300)] {
            let bundle = Bundle::new(BundleId::new("dtn://a/app", 100, seq), "dtn://b")
                .with_lifetime(lifetime);
            storage.store(&bundle).unwrap();
        }
        storage.expire(120);
        storage.wait();
        assert_eq!(storage.count(), 2);
        storage.expire(121);
        storage.wait();
        assert_eq!(storage.count(), 1);
        assert!(storage.contains(&BundleId::new("dtn://a/app", 100, 3)));

        drop(storage);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_config_is_recorded() {
        let path = temp_db("config");
        let config = RedbStorageConfigBuilder::default()
            .db_path(path.clone())
            .max_bytes(1 << 20)
            .build()
            .unwrap();
        let storage = RedbBundleStorage::open(config.clone()).unwrap();
        assert_eq!(storage.stored_config().unwrap(), Some(config));
        drop(storage);
        fs::remove_file(&path).unwrap();
    }
}
