use crate::bloom::BloomError;
use crate::index::SelectorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage full: {required} bytes required, {available} available")]
    StorageFull { required: u64, available: u64 },

    #[error("No bundle found")]
    NoBundleFound,

    #[error("Bundle could not be loaded: {0}")]
    BundleLoad(String),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage is shutting down")]
    ShuttingDown,

    #[error("Storage is in faulty mode")]
    Faulty,

    #[cfg(feature = "redb")]
    #[error("ReDB error: {0}")]
    Redb(Box<redb::Error>),
}

impl StoreError {
    /// True for the "nothing there" family, which includes bundles whose
    /// metadata existed but whose bytes could not be loaded.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NoBundleFound | StoreError::BundleLoad(_))
    }
}

impl From<BloomError> for StoreError {
    fn from(err: BloomError) -> Self {
        match err {
            BloomError::InvalidConfig(_) | BloomError::TooManySalts { .. } => {
                StoreError::Config(err.to_string())
            }
            BloomError::Truncated { .. } | BloomError::InvalidLength(_) => {
                StoreError::Serialization(err.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redb")]
impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Redb(Box::new(err))
    }
}

impl From<crate::sdnv::SdnvError> for StoreError {
    fn from(err: crate::sdnv::SdnvError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
