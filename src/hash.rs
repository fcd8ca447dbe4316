use crate::bloom::{BloomError, BloomResult};
use fnv::FnvHasher;
use murmur3::murmur3_32;
use std::fmt::Debug;
use std::hash::Hasher;
use std::io::Cursor;

/// Number of salts in [`PREDEFINED_SALTS`].
pub const MAX_SALTS: usize = 64;

/// Seeds of the salted hash family. The table is fixed: filters exchanged
/// between nodes only agree when both sides hash with the same salts.
pub const PREDEFINED_SALTS: [u32; MAX_SALTS] = [
    0xAAAAAAAA, 0x55555555, 0x33333333, 0xCCCCCCCC, 0x66666666, 0x99999999,
    0xB5B5B5B5, 0x4B4B4B4B, 0xAA55AA55, 0x55335533, 0x33CC33CC, 0xCC66CC66,
    0x66996699, 0x99B599B5, 0xB54BB54B, 0x4BAA4BAA, 0xAA33AA33, 0x55CC55CC,
    0x33663366, 0xCC99CC99, 0x66B566B5, 0x994B994B, 0xB5AAB5AA, 0xAAAAAA33,
    0x555555CC, 0x33333366, 0xCCCCCC99, 0x666666B5, 0x9999994B, 0xB5B5B5AA,
    0xFFFFFFFF, 0xFFFF0000, 0xB823D5EB, 0xC1191CDF, 0xF623AEB3, 0xDB58499F,
    0xC8D42E70, 0xB173F616, 0xA91A5967, 0xDA427D63, 0xB1E8A2EA, 0xF6C0D155,
    0x4909FEA3, 0xA68CC6A7, 0xC395E782, 0xA26057EB, 0x0CD5DA28, 0x467C5492,
    0xF15E6982, 0x61C6FAD3, 0x9615E352, 0x6E9E355A, 0x689B563E, 0x0C9831A8,
    0x6753C18B, 0xA622689B, 0x8CA63C47, 0x42CC2884, 0x8E89919B, 0x6EDBD7D3,
    0x15B6796C, 0x1D6FDFE4, 0x63FF9092, 0xE7401432,
];

/// Produces the `k` hash values a Bloom filter sets or tests for an item.
///
/// Two providers compare equal when they produce the same family of hashes;
/// Bloom filter set algebra is only defined between filters whose providers
/// are equal.
pub trait HashProvider: Clone + PartialEq + Debug + Send + Sync {
    /// Creates a provider yielding `count` hashes per item.
    fn configure(count: usize) -> BloomResult<Self>
    where
        Self: Sized;

    /// Number of hashes produced per item.
    fn count(&self) -> usize;

    /// Exactly [`count`](Self::count) raw hash values for `item`. Callers
    /// reduce them modulo their table size.
    fn hash(&self, item: &[u8]) -> Vec<u32>;
}

/// Default provider: one AP-style rolling hash per salt taken from
/// [`PREDEFINED_SALTS`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaltedHashProvider {
    salt_count: usize,
}

impl Default for SaltedHashProvider {
    fn default() -> Self {
        Self {
            salt_count: crate::bloom::DEFAULT_SALT_COUNT,
        }
    }
}

impl SaltedHashProvider {
    pub fn salts(&self) -> &[u32] {
        &PREDEFINED_SALTS[..self.salt_count]
    }
}

impl HashProvider for SaltedHashProvider {
    fn configure(count: usize) -> BloomResult<Self> {
        if count == 0 {
            return Err(BloomError::InvalidConfig(
                "Salt count must be > 0".into(),
            ));
        }
        if count > MAX_SALTS {
            return Err(BloomError::TooManySalts {
                requested: count,
                max: MAX_SALTS,
            });
        }
        Ok(Self { salt_count: count })
    }

    fn count(&self) -> usize {
        self.salt_count
    }

    fn hash(&self, item: &[u8]) -> Vec<u32> {
        self.salts().iter().map(|&salt| hash_ap(item, salt)).collect()
    }
}

/// Order sensitive rolling hash seeded with `salt`, consuming two bytes per
/// round.
pub fn hash_ap(item: &[u8], salt: u32) -> u32 {
    let mut hash = salt;
    let mut pairs = item.chunks_exact(2);

    for pair in &mut pairs {
        let (a, b) = (u32::from(pair[0]), u32::from(pair[1]));
        hash ^= (hash << 7) ^ a.wrapping_mul(hash >> 3);
        hash ^= !((hash << 11).wrapping_add(b ^ (hash >> 5)));
    }

    if let [last] = pairs.remainder() {
        hash ^= (hash << 7) ^ u32::from(*last).wrapping_mul(hash >> 3);
    }

    hash
}

/// Double hashing (`h1 + i * h2`) over Murmur3 and FNV-1. Not bounded by a
/// salt table, but incompatible with filters built by
/// [`SaltedHashProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoubleHashProvider {
    num_hashes: usize,
}

impl HashProvider for DoubleHashProvider {
    fn configure(count: usize) -> BloomResult<Self> {
        if count == 0 {
            return Err(BloomError::InvalidConfig(
                "Number of hashes must be > 0".into(),
            ));
        }
        Ok(Self { num_hashes: count })
    }

    fn count(&self) -> usize {
        self.num_hashes
    }

    fn hash(&self, item: &[u8]) -> Vec<u32> {
        let h1 = hash_murmur32(item);
        let h2 = hash_fnv32(item);
        (0..self.num_hashes)
            .map(|i| h1.wrapping_add((i as u32).wrapping_mul(h2)))
            .collect()
    }
}

pub(crate) fn hash_murmur32(key: &[u8]) -> u32 {
    let mut cursor = Cursor::new(key);
    // reading from an in-memory cursor does not fail
    murmur3_32(&mut cursor, 0).unwrap_or_default()
}

pub(crate) fn hash_fnv32(key: &[u8]) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(key);
    hasher.finish() as u32
}
