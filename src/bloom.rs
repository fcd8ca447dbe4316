//! Growable Bloom filter with a pluggable hash provider.
pub mod config;
pub mod error;
pub mod filter;

pub use config::{
    BloomFilterConfig, BloomFilterConfigBuilder, BloomFilterConfigBuilderError,
    DEFAULT_SALT_COUNT, DEFAULT_TABLE_MAX, DEFAULT_TABLE_SIZE,
};
pub use error::{BloomError, BloomResult};
pub use filter::{ALLOCATION_THRESHOLD, BloomFilter};
