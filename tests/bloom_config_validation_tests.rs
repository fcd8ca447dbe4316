use dtn_bundle_store::bloom::{
    BloomError, BloomFilter, BloomFilterConfig, BloomFilterConfigBuilder,
    DEFAULT_SALT_COUNT, DEFAULT_TABLE_MAX, DEFAULT_TABLE_SIZE,
};
use dtn_bundle_store::hash::MAX_SALTS;
use dtn_bundle_store::{SaltedHashProvider, StoreError, StorageConfigBuilder};
use dtn_bundle_store::MemoryBundleStorage;

#[cfg(test)]
mod table_size_validation_tests {
    use super::*;

    #[test]
    fn test_zero_table_size_fails() {
        let config = BloomFilterConfigBuilder::default()
            .table_size(0)
            .build()
            .unwrap();

        match config.validate().unwrap_err() {
            BloomError::InvalidConfig(msg) => {
                assert!(msg.contains("Table size must be > 0"));
            }
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let config = BloomFilterConfigBuilder::default()
            .table_size(64)
            .table_size_max(8)
            .build()
            .unwrap();
        assert!(config.validate().is_ok());

        let filter = BloomFilter::<SaltedHashProvider>::from_config(&config).unwrap();
        assert_eq!(filter.size(), 64);
        assert_eq!(filter.max_size(), 64);
    }

    #[test]
    fn test_defaults() {
        let config = BloomFilterConfig::default();
        assert_eq!(config.table_size, DEFAULT_TABLE_SIZE);
        assert_eq!(config.table_size_max, DEFAULT_TABLE_MAX);
        assert_eq!(config.salt_count, DEFAULT_SALT_COUNT);
    }
}

#[cfg(test)]
mod salt_validation_tests {
    use super::*;

    #[test]
    fn test_zero_salts_fail() {
        let config = BloomFilterConfigBuilder::default()
            .salt_count(0)
            .build()
            .unwrap();
        assert!(matches!(config.validate(), Err(BloomError::InvalidConfig(_))));
    }

    #[test]
    fn test_salt_table_bound() {
        let ok = BloomFilterConfigBuilder::default()
            .salt_count(MAX_SALTS)
            .build()
            .unwrap();
        assert!(ok.validate().is_ok());

        let too_many = BloomFilterConfigBuilder::default()
            .salt_count(MAX_SALTS + 1)
            .build()
            .unwrap();
        assert_eq!(
            too_many.validate(),
            Err(BloomError::TooManySalts {
                requested: MAX_SALTS + 1,
                max: MAX_SALTS
            })
        );
        assert!(BloomFilter::new(16, 16, MAX_SALTS + 1).is_err());
    }

    #[test]
    fn test_storage_surfaces_config_error() {
        let config = StorageConfigBuilder::default()
            .summary(
                BloomFilterConfigBuilder::default()
                    .salt_count(MAX_SALTS + 1)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert!(matches!(
            MemoryBundleStorage::new(config),
            Err(StoreError::Config(_))
        ));
    }
}
