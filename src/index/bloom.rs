// src/index/bloom.rs
//! Bloom filter backing the approximate existence index.
//!
//! No false negatives; the false-positive rate is fixed when the filter is
//! sized. Bits are stored in `u64` words so the filter persists with the
//! same bit-stream code as the exact tables.

use crate::bits::BitStream;

/// Fixed-size bit array probed by `num_hashes` derived hash positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    seed: u64,
}

const DEFAULT_SEED: u64 = 0x517c_c1b7_2722_0a95;

/// Largest filter `new` will allocate (2^40 bits, 128 GiB).
const MAX_BITS: u64 = 1 << 40;

pub(crate) const MAX_HASHES: u32 = 32;

/// Whole words for a request of `num_bits`, at least one and at most
/// `MAX_BITS / 64`.
#[inline]
fn word_count(num_bits: u64) -> u64 {
    num_bits.clamp(64, MAX_BITS).div_ceil(64)
}

impl BloomFilter {
    /// Size for `expected_items` at false-positive rate `fp_rate`.
    pub fn with_fp_rate(expected_items: u64, fp_rate: f64) -> Self {
        let expected = expected_items.max(1) as f64;
        // m = -n ln(p) / ln(2)^2, k = (m / n) ln(2)
        let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
        let num_bits = (-expected * fp_rate.ln() / ln2_sq).ceil() as u64;
        let num_hashes = ((num_bits as f64 / expected) * std::f64::consts::LN_2).ceil() as u32;
        Self::new(num_bits, num_hashes)
    }

    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        let words = word_count(num_bits);
        Self {
            bits: vec![0u64; words as usize],
            num_bits: words * 64,
            num_hashes: num_hashes.clamp(1, MAX_HASHES),
            seed: DEFAULT_SEED,
        }
    }

    /// Rebuild from persisted parts.
    pub(crate) fn from_parts(bits: Vec<u64>, num_hashes: u32, seed: u64) -> Self {
        let num_bits = bits.len() as u64 * 64;
        Self {
            bits,
            num_bits,
            num_hashes,
            seed,
        }
    }

    #[inline]
    pub fn insert(&mut self, code: u64) {
        let hash = self.hash_code(code);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(hash, i);
            self.bits[(bit_idx / 64) as usize] |= 1u64 << (bit_idx % 64);
        }
    }

    /// `false` means definitely absent.
    #[inline]
    pub fn may_contain(&self, code: u64) -> bool {
        let hash = self.hash_code(code);
        (0..self.num_hashes).all(|i| {
            let bit_idx = self.get_bit_index(hash, i);
            self.bits[(bit_idx / 64) as usize] & (1u64 << (bit_idx % 64)) != 0
        })
    }

    /// Double hashing: h(i) = h1 + i*h2 mod m
    #[inline]
    fn get_bit_index(&self, hash: u64, i: u32) -> u64 {
        let h1 = hash as u32 as u64;
        let h2 = (hash >> 32) as u32 as u64;
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    /// Murmur3 64-bit finalizer over the seeded code.
    #[inline]
    fn hash_code(&self, code: u64) -> u64 {
        let mut h = code ^ self.seed;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^ (h >> 33)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn words(&self) -> &[u64] {
        &self.bits
    }

    /// Estimated false-positive rate from the fill ratio.
    pub fn estimated_fp_rate(&self) -> f64 {
        let bits_set: u64 = self.bits.iter().map(|w| w.count_ones() as u64).sum();
        let fill_ratio = bits_set as f64 / self.num_bits as f64;
        fill_ratio.powi(self.num_hashes as i32)
    }

    pub(crate) fn to_stream(&self) -> BitStream {
        let mut bs = BitStream::with_capacity_bits(self.num_bits);
        for &w in &self.bits {
            bs.put_bits(w, 64);
        }
        bs
    }
}
