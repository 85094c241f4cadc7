//! Bucket/check split of a code and hash-table sizing.

use tracing::debug;

use crate::bits::bits_needed;
use crate::bits::low_mask;
use crate::error::{IndexError, Result};

/// Largest bucket selector.
pub const MAX_BUCKET_BITS: u32 = 32;
/// Upper end of the automatic sizing search.
const AUTO_MAX_BUCKET_BITS: u32 = 24;

/// How a `code_bits`-wide code splits into bucket (high bits) and check
/// (low bits).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableGeometry {
    code_bits: u32,
    bucket_bits: u32,
}

impl TableGeometry {
    pub fn new(code_bits: u32, bucket_bits: u32) -> Result<Self> {
        let max = code_bits.min(MAX_BUCKET_BITS);
        if code_bits == 0 || code_bits > 64 {
            return Err(IndexError::range(format!("code width {} bits", code_bits)));
        }
        if bucket_bits == 0 || bucket_bits > max {
            return Err(IndexError::range(format!(
                "bucket bits {} outside 1..={} for {}-bit codes",
                bucket_bits, max, code_bits
            )));
        }
        Ok(Self {
            code_bits,
            bucket_bits,
        })
    }

    pub fn code_bits(&self) -> u32 {
        self.code_bits
    }

    pub fn bucket_bits(&self) -> u32 {
        self.bucket_bits
    }

    pub fn check_bits(&self) -> u32 {
        self.code_bits - self.bucket_bits
    }

    pub fn buckets(&self) -> usize {
        1usize << self.bucket_bits
    }

    #[inline]
    pub fn bucket(&self, code: u64) -> usize {
        (code >> self.check_bits()) as usize
    }

    #[inline]
    pub fn check(&self, code: u64) -> u64 {
        code & low_mask(self.check_bits())
    }

    #[inline]
    pub fn join(&self, bucket: usize, check: u64) -> u64 {
        ((bucket as u64) << self.check_bits()) | check
    }

    /// Pick bucket bits for roughly `approx_mers` entries whose positions
    /// take `posn_width` bits, minimising the estimated table size:
    /// `2^b × ptr_width + approx_mers × (check + count + position)`.
    pub fn auto(
        code_bits: u32,
        approx_mers: u64,
        posn_width: u32,
        max_memory_mb: Option<u64>,
    ) -> Result<Self> {
        let hi = code_bits.min(AUTO_MAX_BUCKET_BITS).max(1);
        let lo = (code_bits + posn_width + 1).saturating_sub(64).max(1).min(hi);
        let budget_bits = max_memory_mb.map_or(u64::MAX, |mb| mb.saturating_mul(8 << 20));
        let ptr_width = bits_needed(approx_mers.saturating_mul((code_bits + 5 + posn_width) as u64)) as u64;

        let mut best: Option<(u32, u64)> = None;
        for b in lo..=hi {
            let per_mer = (code_bits - b + 5 + posn_width) as u64;
            let estimate = (1u64 << b)
                .saturating_add(1)
                .saturating_mul(ptr_width)
                .saturating_add(approx_mers.saturating_mul(per_mer));
            debug!("bucket bits {:2}: estimated {} bits", b, estimate);
            if estimate <= budget_bits && best.map_or(true, |(_, e)| estimate < e) {
                best = Some((b, estimate));
            }
        }

        match best {
            Some((b, estimate)) => {
                debug!(
                    "Chose {} bucket bits for ~{} mers ({} KiB estimated)",
                    b,
                    approx_mers,
                    estimate / 8 / 1024
                );
                Self::new(code_bits, b)
            }
            None => Err(IndexError::range(format!(
                "no table size for ~{} mers fits in {} MB",
                approx_mers,
                max_memory_mb.unwrap_or(0)
            ))),
        }
    }
}
