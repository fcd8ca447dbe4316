use dtn_bundle_store::{Bundle, BundleId, MetaBundle};
use std::{fs, path::PathBuf};

/// Temporary directory that is removed when dropped
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    /// Create a fresh directory name based on the test name
    pub fn new(test_name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "dtn_test_{}_{}_{:08x}",
            test_name,
            std::process::id(),
            rand::random::<u32>()
        ));
        let _ = fs::remove_dir_all(&path);
        Self { path }
    }

    pub fn path(&self) -> PathBuf {
        self.path.clone()
    }

    /// Path of a file inside the directory, creating the directory
    #[allow(dead_code)]
    pub fn file(&self, name: &str) -> PathBuf {
        let _ = fs::create_dir_all(&self.path);
        self.path.join(name)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Bundle from `src` with the given creation time, sequence number, lifetime
/// and payload size
#[allow(dead_code)]
pub fn make_bundle(
    src: &str,
    timestamp: u64,
    sequence: u64,
    lifetime: u64,
    payload: usize,
) -> Bundle {
    Bundle::new(BundleId::new(src, timestamp, sequence), "dtn://dest/app")
        .with_lifetime(lifetime)
        .with_payload(vec![0xAB; payload])
}

/// `count` bundles with random payload sizes up to `max_payload`
#[allow(dead_code)]
pub fn random_bundles(count: usize, max_payload: usize) -> Vec<Bundle> {
    (0..count as u64)
        .map(|seq| {
            let size = rand::random_range(0..=max_payload);
            make_bundle("dtn://random/app", 1000, seq, 3600, size)
        })
        .collect()
}

/// Metadata-only entry expiring at `timestamp + lifetime`
#[allow(dead_code)]
pub fn make_meta(sequence: u64, timestamp: u64, lifetime: u64) -> MetaBundle {
    MetaBundle::new(
        BundleId::new("dtn://meta/app", timestamp, sequence),
        "dtn://dest/app",
        lifetime,
    )
}
