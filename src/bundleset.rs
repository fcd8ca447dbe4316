//! Bundle sets: a Bloom filter summary backed by an exact, expiry ordered
//! index.
//!
//! A set is *consistent* while every key in its filter is also in the exact
//! index; membership tests then never report false positives. Loading a
//! filter received from elsewhere makes the set inconsistent: the exact
//! index is dropped and `has()` answers from the filter alone.
mod registry;

pub use registry::{BundleSetRegistry, NamedBundleSet};

use crate::bloom::{BloomFilter, BloomFilterConfig, BloomResult};
use crate::bundle::{BundleId, MetaBundle};
use crate::expiry::Expirable;
use crate::hash::HashProvider;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Observer of bundles leaving a set because their lifetime ran out.
pub trait ExpiryListener: Send + Sync {
    /// Called synchronously from [`BundleSet::expire`].
    fn on_bundle_expired(&self, meta: &MetaBundle);
}

pub struct BundleSet {
    name: Option<String>,
    bundles: BTreeMap<BundleId, MetaBundle>,
    expire: BTreeSet<(u64, BundleId)>,
    bf: BloomFilter,
    listener: Option<Arc<dyn ExpiryListener>>,
    consistent: bool,
    // filter still carries bits of removed entries
    stale: bool,
}

impl Default for BundleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BundleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSet")
            .field("name", &self.name)
            .field("len", &self.bundles.len())
            .field("filter_size", &self.bf.size())
            .field("consistent", &self.consistent)
            .finish_non_exhaustive()
    }
}

impl BundleSet {
    pub fn new() -> Self {
        Self::with_filter(BloomFilter::default())
    }

    pub fn with_config(config: &BloomFilterConfig) -> BloomResult<Self> {
        Ok(Self::with_filter(BloomFilter::from_config(config)?))
    }

    fn with_filter(bf: BloomFilter) -> Self {
        Self {
            name: None,
            bundles: BTreeMap::new(),
            expire: BTreeSet::new(),
            bf,
            listener: None,
            consistent: true,
            stale: false,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExpiryListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn add(&mut self, meta: MetaBundle) {
        let key = meta.id().canonical();

        if let Some(old) = self.bundles.insert(meta.id().clone(), meta.clone()) {
            self.expire.remove(&(old.expiretime(), old.id().clone()));
        }
        self.expire.insert((meta.expiretime(), meta.id().clone()));

        if self.consistent && self.bf.grow(self.bundles.len() as u64) {
            self.reinsert_all();
            self.stale = false;
        } else {
            self.bf.insert(key.as_bytes());
        }
    }

    pub fn has(&self, id: &BundleId) -> bool {
        if !self.bf.contains(id.canonical().as_bytes()) {
            return false;
        }
        if !self.consistent {
            return true;
        }
        self.bundles.contains_key(id)
    }

    pub fn get(&self, id: &BundleId) -> Option<&MetaBundle> {
        self.bundles.get(id)
    }

    /// Drops `id` from the exact index. Its filter bits stay set until the
    /// next [`refresh`](Self::refresh), an expiry sweep, or a read of the
    /// summary; `has()` is exact in the meantime. An inconsistent set never
    /// clears bits.
    pub fn remove(&mut self, id: &BundleId) -> Option<MetaBundle> {
        let meta = self.bundles.remove(id)?;
        self.expire.remove(&(meta.expiretime(), meta.id().clone()));
        if self.consistent {
            self.stale = true;
        }
        Some(meta)
    }

    /// Rebuilds the filter if removals left bits behind.
    pub fn refresh(&mut self) {
        if self.stale && self.consistent {
            self.rebuild_filter();
        }
        self.stale = false;
    }

    /// Removes every entry whose expiry lies before `now`, reporting each one
    /// to the listener, and returns them in expiry order. `now == 0` means no
    /// clock is available yet and does nothing.
    pub fn expire(&mut self, now: u64) -> Vec<MetaBundle> {
        let mut expired = Vec::new();
        if now == 0 {
            return expired;
        }

        while let Some((expiretime, _)) = self.expire.first() {
            if *expiretime >= now {
                break;
            }
            let Some((_, id)) = self.expire.pop_first() else {
                break;
            };
            if let Some(meta) = self.bundles.remove(&id) {
                if let Some(listener) = &self.listener {
                    listener.on_bundle_expired(&meta);
                }
                expired.push(meta);
            }
        }

        if !expired.is_empty() && self.consistent {
            self.stale = true;
        }
        self.refresh();
        expired
    }

    /// Earliest expiry time still tracked.
    pub fn next_expiry(&self) -> Option<u64> {
        self.expire.first().map(|(expiretime, _)| *expiretime)
    }

    pub fn clear(&mut self) {
        self.bundles.clear();
        self.expire.clear();
        self.bf.clear();
        self.consistent = true;
        self.stale = false;
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaBundle> {
        self.bundles.values()
    }

    /// The summary handed to peers.
    pub fn filter(&mut self) -> &BloomFilter {
        self.refresh();
        &self.bf
    }

    /// Raw filter table, without refreshing.
    pub(crate) fn table(&self) -> &[u8] {
        self.bf.table()
    }

    /// Every entry the peer summarised by `filter` does not have yet.
    pub fn get_not_in<H: HashProvider>(
        &self,
        filter: &BloomFilter<H>,
    ) -> BTreeSet<MetaBundle> {
        self.bundles
            .values()
            .filter(|meta| !filter.contains(meta.id().canonical().as_bytes()))
            .cloned()
            .collect()
    }

    pub fn encoded_len(&mut self) -> usize {
        self.refresh();
        self.bf.encoded_len()
    }

    /// Wire form of the summary, `[SDNV length][filter bytes]`.
    pub fn serialize(&mut self) -> Vec<u8> {
        self.refresh();
        self.bf.serialize()
    }

    /// Replaces the summary with one in wire form and marks the set
    /// inconsistent. The exact index is cleared since it cannot be recovered
    /// from a filter. On error the set is left unchanged.
    pub fn deserialize(&mut self, buf: &[u8]) -> BloomResult<usize> {
        let used = self.bf.deserialize(buf)?;
        self.bundles.clear();
        self.expire.clear();
        self.consistent = false;
        self.stale = false;
        Ok(used)
    }

    /// An unnamed, independent copy with the same listener.
    pub fn copy(&self) -> Self {
        Self {
            name: None,
            bundles: self.bundles.clone(),
            expire: self.expire.clone(),
            bf: self.bf.clone(),
            listener: self.listener.clone(),
            consistent: self.consistent,
            stale: self.stale,
        }
    }

    /// Takes over the contents of `other`, keeping this set's name and
    /// listener.
    pub fn assign(&mut self, other: &BundleSet) {
        self.bundles = other.bundles.clone();
        self.expire = other.expire.clone();
        self.bf = other.bf.clone();
        self.consistent = other.consistent;
        self.stale = other.stale;
    }

    /// Restores persisted state. A consistent set rebuilds its filter from
    /// `bundles`, an inconsistent one takes `filter` verbatim.
    pub(crate) fn restore(
        &mut self,
        bundles: Vec<MetaBundle>,
        filter: &[u8],
        consistent: bool,
    ) {
        self.bundles.clear();
        self.expire.clear();
        for meta in bundles {
            self.expire.insert((meta.expiretime(), meta.id().clone()));
            self.bundles.insert(meta.id().clone(), meta);
        }
        self.consistent = consistent;
        if consistent {
            self.rebuild_filter();
        } else {
            self.bf.load(filter);
        }
    }

    fn rebuild_filter(&mut self) {
        self.bf.clear();
        self.bf.grow(self.bundles.len() as u64);
        self.reinsert_all();
        self.stale = false;
    }

    fn reinsert_all(&mut self) {
        for id in self.bundles.keys() {
            self.bf.insert(id.canonical().as_bytes());
        }
    }
}

impl Expirable for Mutex<BundleSet> {
    fn expire(&self, now: u64) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expire(now);
    }
}
