use super::{Bundle, BundleId, Eid};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Bundle processing control flags (RFC 5050, section 4.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ProcFlags(u64);

impl ProcFlags {
    pub const FRAGMENT: u64 = 1 << 0;
    pub const ADMINISTRATIVE_RECORD: u64 = 1 << 1;
    pub const DONT_FRAGMENT: u64 = 1 << 2;
    pub const CUSTODY_REQUESTED: u64 = 1 << 3;
    pub const DESTINATION_IS_SINGLETON: u64 = 1 << 4;
    pub const APPLICATION_ACK_REQUESTED: u64 = 1 << 5;
    pub const PRIORITY_BIT1: u64 = 1 << 7;
    pub const PRIORITY_BIT2: u64 = 1 << 8;

    pub fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn contains(&self, flag: u64) -> bool {
        self.0 & flag == flag
    }

    pub fn set(&mut self, flag: u64, value: bool) {
        if value {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn with(mut self, flag: u64) -> Self {
        self.set(flag, true);
        self
    }

    pub fn priority(&self) -> Priority {
        if self.contains(Self::PRIORITY_BIT2) {
            Priority::Expedited
        } else if self.contains(Self::PRIORITY_BIT1) {
            Priority::Normal
        } else {
            Priority::Bulk
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.set(Self::PRIORITY_BIT1, priority == Priority::Normal);
        self.set(Self::PRIORITY_BIT2, priority == Priority::Expedited);
        self
    }
}

/// Class of service carried in the priority bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Bulk,
    Normal,
    Expedited,
}

/// Everything needed to index, select and expire a bundle without touching
/// its blocks.
///
/// Two `MetaBundle`s are equal, hash and order by their [`BundleId`] alone.
#[derive(Clone, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct MetaBundle {
    id: BundleId,
    destination: Eid,
    lifetime: u64,
    expiretime: u64,
    flags: ProcFlags,
    payload_length: u64,
    hop_count: Option<u64>,
    app_data_length: u64,
    net_priority: i32,
}

impl MetaBundle {
    pub fn new(id: BundleId, destination: impl Into<Eid>, lifetime: u64) -> Self {
        let mut flags = ProcFlags::default();
        flags.set(ProcFlags::FRAGMENT, id.is_fragment());
        let expiretime = id.timestamp().saturating_add(lifetime);
        Self {
            id,
            destination: destination.into(),
            lifetime,
            expiretime,
            flags,
            payload_length: 0,
            hop_count: None,
            app_data_length: 0,
            net_priority: 0,
        }
    }

    pub fn with_flags(mut self, flags: ProcFlags) -> Self {
        self.flags = flags;
        self.flags.set(ProcFlags::FRAGMENT, self.id.is_fragment());
        self
    }

    pub fn with_payload_length(mut self, length: u64) -> Self {
        self.payload_length = length;
        self
    }

    pub fn with_app_data_length(mut self, length: u64) -> Self {
        self.app_data_length = length;
        self
    }

    pub fn with_hop_count(mut self, hop_count: Option<u64>) -> Self {
        self.hop_count = hop_count;
        self
    }

    pub fn with_net_priority(mut self, net_priority: i32) -> Self {
        self.net_priority = net_priority;
        self
    }

    pub fn id(&self) -> &BundleId {
        &self.id
    }

    pub fn destination(&self) -> &Eid {
        &self.destination
    }

    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    /// Absolute expiry, `timestamp + lifetime` saturated at `u64::MAX`.
    pub fn expiretime(&self) -> u64 {
        self.expiretime
    }

    pub fn flags(&self) -> ProcFlags {
        self.flags
    }

    pub fn priority(&self) -> Priority {
        self.flags.priority()
    }

    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }

    pub fn hop_count(&self) -> Option<u64> {
        self.hop_count
    }

    pub fn app_data_length(&self) -> u64 {
        self.app_data_length
    }

    pub fn net_priority(&self) -> i32 {
        self.net_priority
    }

    pub fn custody_requested(&self) -> bool {
        self.flags.contains(ProcFlags::CUSTODY_REQUESTED)
    }

    pub fn is_singleton(&self) -> bool {
        self.flags.contains(ProcFlags::DESTINATION_IS_SINGLETON)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiretime < now
    }
}

impl From<&Bundle> for MetaBundle {
    fn from(bundle: &Bundle) -> Self {
        Self {
            id: bundle.id().clone(),
            destination: bundle.destination.clone(),
            lifetime: bundle.lifetime,
            expiretime: bundle.id().timestamp().saturating_add(bundle.lifetime),
            flags: bundle.flags(),
            payload_length: bundle.payload_length(),
            hop_count: bundle.hop_count,
            app_data_length: bundle.app_data_length,
            net_priority: bundle.net_priority,
        }
    }
}

impl PartialEq for MetaBundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MetaBundle {}

impl PartialOrd for MetaBundle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetaBundle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for MetaBundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
