use crate::bloom::BloomFilterConfig;
use crate::error::{Result, StoreError};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(pattern = "owned")]
pub struct StorageConfig {
    /// Quota in bytes, 0 for unlimited
    #[builder(default = "0")]
    pub max_bytes: u64,

    /// Bloom filter summarising the stored bundles
    #[builder(default)]
    pub summary: BloomFilterConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            summary: BloomFilterConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        self.summary.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(pattern = "owned")]
pub struct DiskStorageConfig {
    /// Directory holding one file per bundle
    #[builder(default = "PathBuf::from(\"bundles\")")]
    pub path: PathBuf,

    /// Quota in bytes, 0 for unlimited
    #[builder(default = "0")]
    pub max_bytes: u64,

    /// Maximum number of queued writes before `store()` blocks, 0 for
    /// unbounded
    #[builder(default = "0")]
    pub write_buffer: usize,

    /// Delete everything found in `path` instead of restoring it
    #[builder(default = "false")]
    pub initialize: bool,

    #[builder(default)]
    pub summary: BloomFilterConfig,
}

impl DiskStorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("Storage path is empty".into()));
        }
        if self.path.exists() && !self.path.is_dir() {
            return Err(StoreError::Config(format!(
                "Storage path {} is not a directory",
                self.path.display()
            )));
        }
        self.summary.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(pattern = "owned")]
pub struct RedbStorageConfig {
    #[builder(default = "PathBuf::from(\"bundles.redb\")")]
    pub db_path: PathBuf,

    /// Quota in bytes, 0 for unlimited
    #[builder(default = "0")]
    pub max_bytes: u64,

    /// Drop all stored bundles on open
    #[builder(default = "false")]
    pub initialize: bool,
}

impl RedbStorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(StoreError::Config("Database path is empty".into()));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
