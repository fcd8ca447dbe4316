use crate::error::StoreError;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Endpoint identifier, kept as the URI string it was received as.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub const NONE: &'static str = "dtn:none";

    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The null endpoint.
    pub fn none() -> Self {
        Self(Self::NONE.to_string())
    }

    pub fn is_none(&self) -> bool {
        self.0 == Self::NONE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Eid {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for Eid {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

/// Natural key of a bundle or of one fragment of it.
///
/// Ordering is lexicographic over source, timestamp, sequence number,
/// fragment flag and fragment offset. The offset is always zero for
/// bundles that are not fragments.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct BundleId {
    source: Eid,
    timestamp: u64,
    sequence: u64,
    is_fragment: bool,
    fragment_offset: u64,
}

impl BundleId {
    pub fn new(source: impl Into<Eid>, timestamp: u64, sequence: u64) -> Self {
        Self {
            source: source.into(),
            timestamp,
            sequence,
            is_fragment: false,
            fragment_offset: 0,
        }
    }

    pub fn fragment(
        source: impl Into<Eid>,
        timestamp: u64,
        sequence: u64,
        offset: u64,
    ) -> Self {
        Self {
            source: source.into(),
            timestamp,
            sequence,
            is_fragment: true,
            fragment_offset: offset,
        }
    }

    pub fn source(&self) -> &Eid {
        &self.source
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_fragment(&self) -> bool {
        self.is_fragment
    }

    pub fn fragment_offset(&self) -> u64 {
        self.fragment_offset
    }

    /// Same identity under a new creation timestamp and sequence number.
    pub fn relabel(&self, timestamp: u64, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
            ..self.clone()
        }
    }

    /// `[timestamp.sequence] source`, with `.offset` appended inside the
    /// brackets for fragments. This is the string fed to Bloom filters and
    /// used to name persisted blobs.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fragment {
            write!(
                f,
                "[{}.{}.{}] {}",
                self.timestamp, self.sequence, self.fragment_offset, self.source
            )
        } else {
            write!(f, "[{}.{}] {}", self.timestamp, self.sequence, self.source)
        }
    }
}

/// Parses the canonical form produced by [`BundleId::canonical`].
impl FromStr for BundleId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::Config(format!("Invalid bundle id '{s}'"));
        let rest = s.strip_prefix('[').ok_or_else(invalid)?;
        let (numbers, source) = rest.split_once("] ").ok_or_else(invalid)?;
        if source.is_empty() {
            return Err(invalid());
        }

        let parts = numbers
            .split('.')
            .map(|n| n.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [timestamp, sequence] => Ok(Self::new(source, *timestamp, *sequence)),
            [timestamp, sequence, offset] => {
                Ok(Self::fragment(source, *timestamp, *sequence, *offset))
            }
            _ => Err(invalid()),
        }
    }
}
