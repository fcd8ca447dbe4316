use super::{BundleId, Eid, ProcFlags};
use bytes::Bytes;

/// One block of a bundle. Payload data is a shared buffer, so cloning a
/// block or a bundle never copies payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub block_type: u8,
    pub flags: u64,
    pub data: Bytes,
}

impl Block {
    pub const PAYLOAD: u8 = 1;

    pub fn new(block_type: u8, flags: u64, data: impl Into<Bytes>) -> Self {
        Self {
            block_type,
            flags,
            data: data.into(),
        }
    }

    pub fn payload(data: impl Into<Bytes>) -> Self {
        Self::new(Self::PAYLOAD, 0, data)
    }

    pub fn is_payload(&self) -> bool {
        self.block_type == Self::PAYLOAD
    }
}

/// A complete bundle: primary block fields plus an ordered block list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bundle {
    id: BundleId,
    flags: ProcFlags,
    pub destination: Eid,
    pub report_to: Eid,
    pub custodian: Eid,
    pub lifetime: u64,
    /// Total application data length, only meaningful for fragments.
    pub app_data_length: u64,
    pub hop_count: Option<u64>,
    pub net_priority: i32,
    pub blocks: Vec<Block>,
}

impl Bundle {
    pub fn new(id: BundleId, destination: impl Into<Eid>) -> Self {
        let mut flags = ProcFlags::default();
        flags.set(ProcFlags::FRAGMENT, id.is_fragment());
        Self {
            id,
            flags,
            destination: destination.into(),
            report_to: Eid::none(),
            custodian: Eid::none(),
            lifetime: 0,
            app_data_length: 0,
            hop_count: None,
            net_priority: 0,
            blocks: Vec::new(),
        }
    }

    pub fn with_lifetime(mut self, lifetime: u64) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_payload(mut self, data: impl Into<Bytes>) -> Self {
        self.set_payload(data);
        self
    }

    pub fn with_flags(mut self, flags: ProcFlags) -> Self {
        self.set_flags(flags);
        self
    }

    pub fn id(&self) -> &BundleId {
        &self.id
    }

    pub fn flags(&self) -> ProcFlags {
        self.flags
    }

    /// Replaces the processing flags. The fragment bit always mirrors the
    /// bundle id.
    pub fn set_flags(&mut self, flags: ProcFlags) {
        self.flags = flags;
        self.flags.set(ProcFlags::FRAGMENT, self.id.is_fragment());
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.blocks.iter().find(|b| b.is_payload()).map(|b| &b.data)
    }

    pub fn payload_length(&self) -> u64 {
        self.payload().map_or(0, |p| p.len() as u64)
    }

    /// Replaces the payload block, or appends one if there is none.
    pub fn set_payload(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        match self.blocks.iter_mut().find(|b| b.is_payload()) {
            Some(block) => block.data = data,
            None => self.blocks.push(Block::payload(data)),
        }
    }

    /// A copy of this bundle under a new creation timestamp and sequence
    /// number. The payload buffer is shared with the original.
    pub fn relabel(&self, timestamp: u64, sequence: u64) -> Self {
        Self {
            id: self.id.relabel(timestamp, sequence),
            ..self.clone()
        }
    }

    /// Number of bytes the bundle occupies in storage.
    pub fn encoded_len(&self) -> u64 {
        super::codec::encoded_len(self) as u64
    }
}
