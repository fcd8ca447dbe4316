use super::{BloomError, BloomResult};
use crate::hash::MAX_SALTS;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Initial table size used by bundle sets, in bytes.
pub const DEFAULT_TABLE_SIZE: usize = 1024;
/// Growth ceiling, in bytes.
pub const DEFAULT_TABLE_MAX: usize = 524_288;
pub const DEFAULT_SALT_COUNT: usize = 2;

#[derive(Clone, Debug, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(pattern = "owned")]
pub struct BloomFilterConfig {
    /// Initial size of the bit table in bytes
    #[builder(default = "DEFAULT_TABLE_SIZE")]
    pub table_size: usize,

    /// Upper bound for `grow()`, in bytes. Values below `table_size` are
    /// raised to it.
    #[builder(default = "DEFAULT_TABLE_MAX")]
    pub table_size_max: usize,

    /// Number of hash functions (salts)
    #[builder(default = "DEFAULT_SALT_COUNT")]
    pub salt_count: usize,
}

impl Default for BloomFilterConfig {
    fn default() -> Self {
        Self {
            table_size: DEFAULT_TABLE_SIZE,
            table_size_max: DEFAULT_TABLE_MAX,
            salt_count: DEFAULT_SALT_COUNT,
        }
    }
}

impl BloomFilterConfig {
    pub fn validate(&self) -> BloomResult<()> {
        if self.table_size == 0 {
            return Err(BloomError::InvalidConfig(
                "Table size must be > 0".into(),
            ));
        }
        if self.salt_count == 0 {
            return Err(BloomError::InvalidConfig(
                "Salt count must be > 0".into(),
            ));
        }
        if self.salt_count > MAX_SALTS {
            return Err(BloomError::TooManySalts {
                requested: self.salt_count,
                max: MAX_SALTS,
            });
        }
        Ok(())
    }
}
