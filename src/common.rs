use sha2::{Digest, Sha256};

/// Fixed-length file name for an arbitrary key: lowercase hex of its
/// SHA-256 digest.
pub fn file_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Formats a byte count in human-readable form.
pub fn bytes2hr(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Formats a DTN timestamp as an offset from `now`, e.g. `in 42s` or
/// `17s ago`.
pub fn relative_time(timestamp: u64, now: u64) -> String {
    if timestamp >= now {
        format!("in {}s", timestamp - now)
    } else {
        format!("{}s ago", now - timestamp)
    }
}
