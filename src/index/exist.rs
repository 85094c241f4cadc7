//! Set-membership index over k-mer codes.
//!
//! The exact variant stores the distinct codes bucketed by their high bits,
//! with fixed-width check values sorted inside each bucket, so a lookup is a
//! pointer-table read plus a binary search. The approximate variant is a
//! Bloom filter. Neither ever reports a present code as absent.

use crate::bits::{bits_needed, low_mask, BitReader, BitStream};
use crate::build::ConcurrentBuilder;
use crate::error::{IndexError, Result};
use crate::index::bloom::BloomFilter;
use crate::index::geometry::TableGeometry;
use crate::io::source::SequenceSource;
use crate::kmer::builder::KmerBuilder;
use crate::kmer::seed::KmerShape;
use crate::kmer::stream::{KmerStream, Mer};
use crate::stats::{CountSummary, IndexKind, IndexStats};

/// Storage requested when building.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExistenceKind {
    Exact,
    Approximate { fp_rate: f64 },
}

impl ExistenceKind {
    /// A Bloom filter needs a false-positive rate strictly inside (0, 1).
    pub fn validate(&self) -> Result<()> {
        match *self {
            ExistenceKind::Approximate { fp_rate } if !(fp_rate > 0.0 && fp_rate < 1.0) => Err(
                IndexError::range(format!("false-positive rate {} outside (0, 1)", fp_rate)),
            ),
            _ => Ok(()),
        }
    }
}

/// Distinct codes, bucketed and bit-packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExactSet {
    pub(crate) geometry: TableGeometry,
    pub(crate) ptr_width: u32,
    /// `2^b + 1` entry indices.
    pub(crate) pointers: BitStream,
    pub(crate) checks: BitStream,
    pub(crate) len: u64,
}

impl ExactSet {
    /// `codes` must be sorted and free of duplicates.
    pub fn from_sorted(codes: &[u64], code_bits: u32) -> Result<Self> {
        let n = codes.len() as u64;
        let bucket_bits = bits_needed(n).clamp(1, code_bits.min(24));
        let geometry = TableGeometry::new(code_bits, bucket_bits)?;
        let ptr_width = bits_needed(n);
        let check_bits = geometry.check_bits();

        let mut pointers = BitStream::with_capacity_bits((geometry.buckets() as u64 + 1) * ptr_width as u64);
        let mut checks = BitStream::with_capacity_bits(n * check_bits as u64);
        let mut next = 0usize;
        for bucket in 0..geometry.buckets() {
            pointers.put_bits(next as u64, ptr_width);
            while next < codes.len() && geometry.bucket(codes[next]) == bucket {
                checks.put_bits(geometry.check(codes[next]), check_bits);
                next += 1;
            }
        }
        pointers.put_bits(next as u64, ptr_width);

        Ok(Self {
            geometry,
            ptr_width,
            pointers,
            checks,
            len: n,
        })
    }

    #[inline]
    fn pointer(&self, bucket: usize) -> u64 {
        crate::bits::packed::get_bits(
            self.pointers.words(),
            bucket as u64 * self.ptr_width as u64,
            self.ptr_width,
        )
    }

    #[inline]
    fn check_at(&self, idx: u64) -> u64 {
        let w = self.geometry.check_bits();
        crate::bits::packed::get_bits(self.checks.words(), idx * w as u64, w)
    }

    pub fn contains(&self, code: u64) -> bool {
        let bucket = self.geometry.bucket(code);
        let check = self.geometry.check(code);
        let (mut lo, mut hi) = (self.pointer(bucket), self.pointer(bucket + 1));
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.check_at(mid).cmp(&check) {
                std::cmp::Ordering::Equal => return true,
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        false
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stored codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = u64> + '_ {
        let mut reader = BitReader::new(self.checks.words(), self.checks.len_bits());
        let w = self.geometry.check_bits();
        (0..self.geometry.buckets()).flat_map(move |bucket| {
            let n = self.pointer(bucket + 1) - self.pointer(bucket);
            let checks: Vec<u64> = (0..n).filter_map(|_| reader.get_bits(w)).collect();
            checks.into_iter().map(move |c| self.geometry.join(bucket, c))
        })
    }

    /// Pointers ascend and end at `len`.
    pub(crate) fn is_consistent(&self) -> bool {
        let mut prev = 0;
        for bucket in 0..=self.geometry.buckets() {
            let p = self.pointer(bucket);
            if p < prev {
                return false;
            }
            prev = p;
        }
        prev == self.len
            && self.checks.len_bits() == self.len * self.geometry.check_bits() as u64
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Membership {
    Exact(ExactSet),
    Approximate(BloomFilter),
}

/// Built-once membership test over the k-mers of a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistenceIndex {
    pub(crate) shape: KmerShape,
    pub(crate) canonical: bool,
    pub(crate) skip: u32,
    pub(crate) membership: Membership,
    /// Distinct codes inserted.
    pub(crate) number_of_mers: u64,
    pub(crate) number_marked: u64,
}

impl ExistenceIndex {
    /// Index a set of codes already in the index's code space.
    pub fn from_codes(
        shape: KmerShape,
        canonical: bool,
        skip: u32,
        mut codes: Vec<u64>,
        kind: ExistenceKind,
    ) -> Result<Self> {
        if canonical {
            shape.check_canonical()?;
        }
        kind.validate()?;
        codes.sort_unstable();
        codes.dedup();
        let number_of_mers = codes.len() as u64;
        let membership = match kind {
            ExistenceKind::Exact => Membership::Exact(ExactSet::from_sorted(&codes, shape.code_bits())?),
            ExistenceKind::Approximate { fp_rate } => {
                let mut bloom = BloomFilter::with_fp_rate(number_of_mers, fp_rate);
                for &c in &codes {
                    bloom.insert(c);
                }
                Membership::Approximate(bloom)
            }
        };
        Ok(Self {
            shape,
            canonical,
            skip,
            membership,
            number_of_mers,
            number_marked: 0,
        })
    }

    /// Index every k-mer of `stream`, single-threaded.
    pub fn build<S: SequenceSource>(
        stream: &KmerStream<S>,
        canonical: bool,
        kind: ExistenceKind,
    ) -> Result<Self> {
        ConcurrentBuilder::new(1)?.build_existence(stream, canonical, kind)
    }

    pub fn shape(&self) -> &KmerShape {
        &self.shape
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.membership, Membership::Exact(_))
    }

    pub fn len(&self) -> u64 {
        self.number_of_mers
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_mers == 0
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Map a forward code into the stored code space.
    #[inline]
    pub fn index_code(&self, code: u64) -> u64 {
        if !self.canonical {
            return code;
        }
        // Canonical indexes only hold shapes with code-space complements.
        self.shape
            .code_reverse_complement(code)
            .map_or(code, |rc| code.min(rc))
    }

    /// Codes with bits above the code width are never stored.
    #[inline]
    fn fits(&self, code: u64) -> bool {
        code & !low_mask(self.shape.code_bits()) == 0
    }

    #[inline]
    fn contains_code(&self, code: u64) -> bool {
        match &self.membership {
            Membership::Exact(set) => set.contains(code),
            Membership::Approximate(bloom) => bloom.may_contain(code),
        }
    }

    /// May report false positives when approximate; never false negatives.
    #[inline]
    pub fn exists(&self, code: u64) -> bool {
        self.fits(code) && self.contains_code(self.index_code(code))
    }

    /// `None` for an approximate index, which cannot answer exactly.
    #[inline]
    pub fn exists_exact(&self, code: u64) -> Option<bool> {
        match &self.membership {
            Membership::Exact(_) => Some(self.fits(code) && self.contains_code(self.index_code(code))),
            Membership::Approximate(_) => None,
        }
    }

    /// Membership of a streamed k-mer; works for every shape.
    #[inline]
    pub fn contains_mer(&self, mer: &Mer) -> bool {
        self.contains_code(mer.code(self.canonical))
    }

    /// Mark every base of `seq` covered by at least one indexed k-mer.
    pub fn covered_bases(&self, seq: &[u8]) -> Vec<bool> {
        let mut covered = vec![false; seq.len()];
        let mut builder = KmerBuilder::new(self.shape.clone());
        // Bases up to here are already marked.
        let mut marked_to = 0usize;
        for (i, &b) in seq.iter().enumerate() {
            let Some(w) = builder.push(b, i as u64) else {
                continue;
            };
            let code = if self.canonical {
                w.forward.min(w.reverse)
            } else {
                w.forward
            };
            if self.contains_code(code) {
                let from = (w.start as usize).max(marked_to);
                covered[from..=i].iter_mut().for_each(|c| *c = true);
                marked_to = i + 1;
            }
        }
        covered
    }

    pub fn stats(&self) -> IndexStats {
        let counts = CountSummary {
            total: self.number_of_mers,
            distinct: self.number_of_mers,
            unique: self.number_of_mers,
            non_unique_entries: 0,
            max_count: u64::from(self.number_of_mers > 0),
        };
        let (kind, bucket_bits, check_bits, ptr_width, table_bits, payload_bits, fp) =
            match &self.membership {
                Membership::Exact(set) => (
                    IndexKind::ExistenceExact,
                    set.geometry.bucket_bits(),
                    set.geometry.check_bits(),
                    set.ptr_width,
                    set.pointers.len_bits(),
                    set.checks.len_bits(),
                    None,
                ),
                Membership::Approximate(bloom) => (
                    IndexKind::ExistenceApproximate,
                    0,
                    0,
                    0,
                    0,
                    bloom.num_bits(),
                    Some(bloom.estimated_fp_rate()),
                ),
            };
        IndexStats {
            kind,
            shape: self.shape.describe(),
            canonical: self.canonical,
            skip: self.skip,
            track_positions: false,
            number_of_mers: self.number_of_mers,
            number_marked: self.number_marked,
            counts,
            bucket_bits,
            check_bits,
            pointer_width: ptr_width,
            position_width: 0,
            table_bits,
            payload_bits,
            payload_bytes: (table_bits + 7) / 8 + (payload_bits + 7) / 8,
            false_positive_rate: fp,
        }
    }
}
