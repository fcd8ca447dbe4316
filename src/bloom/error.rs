use thiserror::Error;

pub type BloomResult<T> = std::result::Result<T, BloomError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BloomError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Max. {max} hash salts supported, requested {requested}")]
    TooManySalts { requested: usize, max: usize },

    #[error("Truncated filter: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(String),
}

impl From<crate::sdnv::SdnvError> for BloomError {
    fn from(err: crate::sdnv::SdnvError) -> Self {
        BloomError::InvalidLength(err.to_string())
    }
}
