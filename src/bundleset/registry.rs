use super::{BundleSet, ExpiryListener};
use crate::bloom::BloomFilterConfig;
use crate::bundle::MetaBundle;
use crate::common::file_key;
use crate::error::{Result, StoreError};
use bincode::{Decode, Encode};
use std::collections::HashSet;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

const EXTENSION: &str = "bset";

#[derive(Encode, Decode)]
struct PersistedSet {
    name: String,
    consistent: bool,
    filter: Vec<u8>,
    bundles: Vec<MetaBundle>,
}

struct RegistryInner {
    path: PathBuf,
    active: Mutex<HashSet<String>>,
}

impl RegistryInner {
    fn file_for(&self, name: &str) -> PathBuf {
        self.path.join(format!("{}.{EXTENSION}", file_key(name)))
    }

    fn release(&self, name: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn persist(&self, name: &str, set: &BundleSet) -> Result<()> {
        let state = PersistedSet {
            name: name.to_string(),
            consistent: set.is_consistent(),
            filter: set.table().to_vec(),
            bundles: set.iter().cloned().collect(),
        };
        let bytes = bincode::encode_to_vec(&state, bincode::config::standard())?;

        let target = self.file_for(name);
        let tmp = target.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        debug!("Persisted bundle set '{}' ({} entries)", name, set.len());
        Ok(())
    }
}

fn read_persisted(file: &Path) -> Result<PersistedSet> {
    let bytes = fs::read(file)?;
    let (state, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(state)
}

/// Owner of the named bundle sets kept under one directory.
///
/// A name can be open at most once at a time. The handle returned by
/// [`open`](Self::open) writes the set back and releases the name when it
/// is closed or dropped.
#[derive(Clone)]
pub struct BundleSetRegistry {
    inner: Arc<RegistryInner>,
}

impl BundleSetRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                path,
                active: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn open(&self, name: &str) -> Result<NamedBundleSet> {
        self.open_with(name, &BloomFilterConfig::default(), None)
    }

    /// Opens `name`, restoring its persisted contents if there are any.
    pub fn open_with(
        &self,
        name: &str,
        config: &BloomFilterConfig,
        listener: Option<Arc<dyn ExpiryListener>>,
    ) -> Result<NamedBundleSet> {
        if name.is_empty() {
            return Err(StoreError::Config("Bundle set name is empty".into()));
        }
        {
            let mut active = self
                .inner
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !active.insert(name.to_string()) {
                return Err(StoreError::Config(format!(
                    "Bundle set '{name}' is already open"
                )));
            }
        }

        match self.load(name, config, listener) {
            Ok(set) => Ok(NamedBundleSet {
                set,
                name: name.to_string(),
                registry: self.inner.clone(),
                closed: false,
            }),
            Err(err) => {
                self.inner.release(name);
                Err(err)
            }
        }
    }

    fn load(
        &self,
        name: &str,
        config: &BloomFilterConfig,
        listener: Option<Arc<dyn ExpiryListener>>,
    ) -> Result<BundleSet> {
        let mut set = BundleSet::with_config(config)?;
        set.set_name(Some(name.to_string()));
        if let Some(listener) = listener {
            set = set.with_listener(listener);
        }

        let file = self.inner.file_for(name);
        if file.exists() {
            let state = read_persisted(&file)?;
            if state.name != name {
                return Err(StoreError::BundleLoad(format!(
                    "{} holds bundle set '{}', expected '{}'",
                    file.display(),
                    state.name,
                    name
                )));
            }
            set.restore(state.bundles, &state.filter, state.consistent);
            info!("Restored bundle set '{}' with {} entries", name, set.len());
        }
        Ok(set)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Names of all persisted sets.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.inner.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match read_persisted(&path) {
                Ok(state) => names.push(state.name),
                Err(err) => debug!("Skipping {}: {}", path.display(), err),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes the persisted state of a set that is not open.
    pub fn remove(&self, name: &str) -> Result<()> {
        if self.is_open(name) {
            return Err(StoreError::Config(format!(
                "Bundle set '{name}' is open"
            )));
        }
        let file = self.inner.file_for(name);
        if file.exists() {
            fs::remove_file(file)?;
        }
        Ok(())
    }
}

/// An open named set. Dereferences to [`BundleSet`].
pub struct NamedBundleSet {
    set: BundleSet,
    name: String,
    registry: Arc<RegistryInner>,
    closed: bool,
}

impl NamedBundleSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes the current contents to disk.
    pub fn persist(&self) -> Result<()> {
        self.registry.persist(&self.name, &self.set)
    }

    /// Persists and releases the name, reporting write errors that `Drop`
    /// can only log.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self.persist();
        self.registry.release(&self.name);
        result
    }
}

impl Deref for NamedBundleSet {
    type Target = BundleSet;

    fn deref(&self) -> &BundleSet {
        &self.set
    }
}

impl DerefMut for NamedBundleSet {
    fn deref_mut(&mut self) -> &mut BundleSet {
        &mut self.set
    }
}

impl Drop for NamedBundleSet {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.persist() {
            error!("Error persisting bundle set '{}': {}", self.name, err);
        }
        self.registry.release(&self.name);
    }
}
