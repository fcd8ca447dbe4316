use super::{
    BloomError, BloomFilterConfig, BloomResult, DEFAULT_TABLE_MAX,
    DEFAULT_TABLE_SIZE,
};
use crate::hash::{HashProvider, SaltedHashProvider};
use crate::sdnv;
use bitvec::{order::Lsb0, vec::BitVec};

/// False-positive estimate a filter must stay below after `grow()`.
pub const ALLOCATION_THRESHOLD: f64 = 0.0001;

/// Bloom filter whose table can grow in powers of two up to a ceiling.
///
/// Bit `i` lives in byte `i / 8` under mask `1 << (i % 8)`, so the raw table
/// returned by [`table`](Self::table) is the same byte string peers exchange
/// on the wire.
///
/// Growing discards every bit. After [`grow`](Self::grow) returns `true`
/// the filter is empty and the owner must re-insert each live item;
/// [`BundleSet`](crate::BundleSet) does this automatically.
#[derive(Clone, Debug)]
pub struct BloomFilter<H: HashProvider = SaltedHashProvider> {
    provider: H,
    bits: BitVec<u8, Lsb0>,
    // all sizes in bits
    table_size: usize,
    table_size_init: usize,
    table_size_max: usize,
    item_count: u64,
}

impl BloomFilter<SaltedHashProvider> {
    /// Creates a zeroed filter of `table_size` bytes that may grow up to
    /// `table_size_max` bytes, hashing with `salt_count` salts.
    pub fn new(
        table_size: usize,
        table_size_max: usize,
        salt_count: usize,
    ) -> BloomResult<Self> {
        Self::with_provider(
            table_size,
            table_size_max,
            SaltedHashProvider::configure(salt_count)?,
        )
    }
}

impl Default for BloomFilter<SaltedHashProvider> {
    fn default() -> Self {
        let bits = DEFAULT_TABLE_SIZE * 8;
        Self {
            provider: SaltedHashProvider::default(),
            bits: BitVec::repeat(false, bits),
            table_size: bits,
            table_size_init: bits,
            table_size_max: DEFAULT_TABLE_MAX * 8,
            item_count: 0,
        }
    }
}

impl<H: HashProvider> BloomFilter<H> {
    pub fn with_provider(
        table_size: usize,
        table_size_max: usize,
        provider: H,
    ) -> BloomResult<Self> {
        if table_size == 0 {
            return Err(BloomError::InvalidConfig(
                "Table size must be > 0".into(),
            ));
        }
        let bits = table_size * 8;
        let max_bits = table_size_max.max(table_size) * 8;

        Ok(Self {
            provider,
            bits: BitVec::repeat(false, bits),
            table_size: bits,
            table_size_init: bits,
            table_size_max: max_bits,
            item_count: 0,
        })
    }

    pub fn from_config(config: &BloomFilterConfig) -> BloomResult<Self> {
        config.validate()?;
        Self::with_provider(
            config.table_size,
            config.table_size_max,
            H::configure(config.salt_count)?,
        )
    }

    pub fn insert(&mut self, item: &[u8]) {
        if self.table_size == 0 {
            return;
        }
        for hash in self.provider.hash(item) {
            let idx = hash as usize % self.table_size;
            self.bits.set(idx, true);
        }
        self.item_count = self.item_count.saturating_add(1);
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        if self.table_size == 0 {
            return false;
        }
        self.provider
            .hash(item)
            .into_iter()
            .all(|hash| self.bits[hash as usize % self.table_size])
    }

    /// Zeroes the table, shrinking it back to the initial size if it grew.
    /// A loaded table smaller than that keeps its size.
    pub fn clear(&mut self) {
        if self.table_size > self.table_size_init {
            self.reallocate(self.table_size_init);
        } else {
            self.bits.fill(false);
        }
        self.item_count = 0;
    }

    /// Replaces the table with `raw`, adopting its size. The number of
    /// items behind a foreign table is unknown, so the counter restarts at 0.
    pub fn load(&mut self, raw: &[u8]) {
        self.bits = BitVec::from_slice(raw);
        self.table_size = raw.len() * 8;
        self.item_count = 0;
    }

    /// False-positive probability for `item_count` items in a table of
    /// `table_size` bits: `(1 - (1 - 1/m)^(k*n))^k`.
    pub fn estimate_allocation(&self, item_count: u64, table_size: usize) -> f64 {
        if table_size == 0 {
            return 1.0;
        }
        let k = self.provider.count() as f64;
        let m = table_size as f64;
        let n = item_count as f64;
        (1.0 - (1.0 - 1.0 / m).powf(k * n)).powf(k)
    }

    /// Estimate for the current table and item counter.
    pub fn allocation(&self) -> f64 {
        self.estimate_allocation(self.item_count, self.table_size)
    }

    /// Doubles the table until `item_count` items would stay under
    /// [`ALLOCATION_THRESHOLD`] or the ceiling is reached.
    ///
    /// Returns `true` if the table was reallocated. All bits are gone at
    /// that point and every live item has to be inserted again.
    pub fn grow(&mut self, item_count: u64) -> bool {
        if self.table_size >= self.table_size_max {
            return false;
        }
        if self.estimate_allocation(item_count, self.table_size)
            < ALLOCATION_THRESHOLD
        {
            return false;
        }

        let mut new_size = self.table_size.max(8);
        while new_size < self.table_size_max {
            new_size = (new_size * 2).min(self.table_size_max);
            if self.estimate_allocation(item_count, new_size) < ALLOCATION_THRESHOLD
            {
                break;
            }
        }

        self.reallocate(new_size);
        self.item_count = 0;
        true
    }

    /// Whether set algebra between the two filters is defined.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.provider == other.provider && self.table_size == other.table_size
    }

    /// Bitwise AND with `other`. Returns `false` and leaves the table
    /// untouched when the filters are not compatible.
    pub fn and_assign(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// Bitwise OR with `other`, see [`and_assign`](Self::and_assign).
    pub fn or_assign(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a | b)
    }

    /// Bitwise XOR with `other`, see [`and_assign`](Self::and_assign).
    pub fn xor_assign(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a ^ b)
    }

    fn combine(&mut self, other: &Self, op: impl Fn(u8, u8) -> u8) -> bool {
        if !self.is_compatible(other) {
            return false;
        }
        for (dst, src) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *dst = op(*dst, *src);
        }
        true
    }

    /// Table size in bytes.
    pub fn size(&self) -> usize {
        self.table_size / 8
    }

    pub fn table_size_bits(&self) -> usize {
        self.table_size
    }

    /// Growth ceiling in bytes.
    pub fn max_size(&self) -> usize {
        self.table_size_max / 8
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn provider(&self) -> &H {
        &self.provider
    }

    /// Raw bit table.
    pub fn table(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// Length of [`serialize`](Self::serialize) output.
    pub fn encoded_len(&self) -> usize {
        let size = self.size();
        sdnv::encoded_len(size as u64) + size
    }

    /// Wire form: `[SDNV table length][raw table]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        sdnv::encode_chunk(self.table(), &mut out);
        out
    }

    /// Loads a table in wire form from the front of `buf` and returns the
    /// number of bytes consumed.
    pub fn deserialize(&mut self, buf: &[u8]) -> BloomResult<usize> {
        let (len, header) = sdnv::decode(buf)?;
        let len = usize::try_from(len)
            .map_err(|_| BloomError::InvalidLength(len.to_string()))?;
        let available = buf.len() - header;
        if available < len {
            return Err(BloomError::Truncated {
                needed: len,
                available,
            });
        }
        self.load(&buf[header..header + len]);
        Ok(header + len)
    }

    fn reallocate(&mut self, table_size: usize) {
        self.bits = BitVec::repeat(false, table_size);
        self.table_size = table_size;
    }
}
