//! K-mer code to position-list table.
//!
//! Records live in one bit stream, grouped by bucket (the high bits of the
//! code) and sorted by check value (the low bits) inside each bucket:
//!
//! ```text
//! [check: c-b bits][count: number][count x position: posn_width bits]
//! ```
//!
//! A pointer table of `2^b + 1` fixed-width bit offsets marks where each
//! bucket starts. Lookup seeks to the bucket and scans it; the table is
//! never modified after construction, so any number of threads may query it.

use std::sync::OnceLock;

use ahash::AHashSet;

use crate::bits::packed::get_bits;
use crate::bits::{bits_needed, low_mask, number_width, BitReader, BitStream};
use crate::build::{BuildOptions, ConcurrentBuilder};
use crate::error::{IndexError, Result};
use crate::index::geometry::TableGeometry;
use crate::index::mismatch::{MismatchEnumerator, MAX_ERRORS};
use crate::index::policy::BuildPolicy;
use crate::io::source::SequenceSource;
use crate::kmer::seed::KmerShape;
use crate::kmer::stream::KmerStream;
use crate::stats::{CountSummary, IndexKind, IndexStats};

/// One distinct k-mer and where it occurs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionRecord {
    pub code: u64,
    pub count: u64,
    /// Ascending; empty when the index does not track positions.
    pub positions: Vec<u64>,
}

/// Everything about a table that is fixed before any record is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct IndexLayout {
    pub shape: KmerShape,
    pub canonical: bool,
    pub skip: u32,
    pub track_positions: bool,
    pub geometry: TableGeometry,
}

#[derive(Clone, Debug)]
pub struct PositionIndex {
    pub(crate) layout: IndexLayout,
    pub(crate) ptr_width: u32,
    pub(crate) posn_width: u32,
    pub(crate) pointers: BitStream,
    pub(crate) records: BitStream,
    /// Occurrences stored.
    pub(crate) number_of_mers: u64,
    /// Occurrences removed by the build policy.
    pub(crate) number_marked: u64,
    pub(crate) counts: CountSummary,
    mismatch: [OnceLock<MismatchEnumerator>; MAX_ERRORS as usize],
}

impl PartialEq for PositionIndex {
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout
            && self.ptr_width == other.ptr_width
            && self.posn_width == other.posn_width
            && self.pointers == other.pointers
            && self.records == other.records
            && self.number_of_mers == other.number_of_mers
            && self.number_marked == other.number_marked
            && self.counts == other.counts
    }
}

impl PositionIndex {
    /// Index every k-mer of `stream` admitted by `policy`, single-threaded.
    pub fn build<S: SequenceSource>(
        stream: &KmerStream<S>,
        options: &BuildOptions,
        policy: &BuildPolicy<'_>,
    ) -> Result<Self> {
        ConcurrentBuilder::new(1)?.build_position(stream, options, policy)
    }

    /// Write the table from records sorted by code.
    ///
    /// `records` is walked twice: once to size the fields, once to write.
    pub(crate) fn assemble<I>(layout: IndexLayout, records: I, number_marked: u64) -> Self
    where
        I: Iterator<Item = PositionRecord> + Clone,
    {
        let check_bits = layout.geometry.check_bits();

        let mut counts = CountSummary::default();
        let mut max_position = 0u64;
        for r in records.clone() {
            counts.add(r.count);
            if let Some(&last) = r.positions.last() {
                max_position = max_position.max(last);
            }
        }
        let posn_width = if layout.track_positions {
            bits_needed(max_position)
        } else {
            0
        };

        let mut total_bits = 0u64;
        for r in records.clone() {
            total_bits += check_bits as u64 + number_width(r.count) + r.count * posn_width as u64;
        }
        let ptr_width = bits_needed(total_bits);

        let buckets = layout.geometry.buckets();
        let mut pointers = BitStream::with_capacity_bits((buckets as u64 + 1) * ptr_width as u64);
        let mut data = BitStream::with_capacity_bits(total_bits);
        let mut next_bucket = 0usize;
        for r in records {
            let bucket = layout.geometry.bucket(r.code);
            while next_bucket <= bucket {
                pointers.put_bits(data.len_bits(), ptr_width);
                next_bucket += 1;
            }
            data.put_bits(layout.geometry.check(r.code), check_bits);
            data.put_number(r.count);
            if layout.track_positions {
                for &p in &r.positions {
                    data.put_bits(p, posn_width);
                }
            }
        }
        while next_bucket <= buckets {
            pointers.put_bits(data.len_bits(), ptr_width);
            next_bucket += 1;
        }

        Self {
            layout,
            ptr_width,
            posn_width,
            pointers,
            records: data,
            number_of_mers: counts.total,
            number_marked,
            counts,
            mismatch: Default::default(),
        }
    }

    pub(crate) fn from_parts(
        layout: IndexLayout,
        ptr_width: u32,
        posn_width: u32,
        pointers: BitStream,
        records: BitStream,
        number_of_mers: u64,
        number_marked: u64,
        counts: CountSummary,
    ) -> Self {
        Self {
            layout,
            ptr_width,
            posn_width,
            pointers,
            records,
            number_of_mers,
            number_marked,
            counts,
            mismatch: Default::default(),
        }
    }

    pub fn shape(&self) -> &KmerShape {
        &self.layout.shape
    }

    pub fn is_canonical(&self) -> bool {
        self.layout.canonical
    }

    pub fn skip(&self) -> u32 {
        self.layout.skip
    }

    pub fn tracks_positions(&self) -> bool {
        self.layout.track_positions
    }

    pub fn geometry(&self) -> &TableGeometry {
        &self.layout.geometry
    }

    pub fn number_of_mers(&self) -> u64 {
        self.number_of_mers
    }

    pub fn number_marked(&self) -> u64 {
        self.number_marked
    }

    pub fn number_distinct(&self) -> u64 {
        self.counts.distinct
    }

    #[inline]
    fn pointer(&self, bucket: usize) -> u64 {
        get_bits(
            self.pointers.words(),
            bucket as u64 * self.ptr_width as u64,
            self.ptr_width,
        )
    }

    /// Map a forward code into the stored code space.
    #[inline]
    pub fn index_code(&self, code: u64) -> u64 {
        if !self.layout.canonical {
            return code;
        }
        // Canonical layouts only hold shapes with code-space complements.
        self.layout
            .shape
            .code_reverse_complement(code)
            .map_or(code, |rc| code.min(rc))
    }

    /// Scan the bucket of a stored-space code; on a hit the reader sits on
    /// the record's first position.
    #[inline]
    fn locate(&self, code: u64) -> Option<(u64, BitReader<'_>)> {
        let geometry = &self.layout.geometry;
        if code & !low_mask(geometry.code_bits()) != 0 {
            return None;
        }
        let bucket = geometry.bucket(code);
        let check = geometry.check(code);
        let end = self.pointer(bucket + 1);
        let mut reader = BitReader::new(self.records.words(), self.records.len_bits());
        reader.seek(self.pointer(bucket)).ok()?;

        let check_bits = geometry.check_bits();
        while reader.position() < end {
            let c = reader.get_bits(check_bits)?;
            let count = reader.get_number()?;
            if c == check {
                return Some((count, reader));
            }
            if c > check {
                return None;
            }
            if self.layout.track_positions && !reader.skip(count * self.posn_width as u64) {
                return None;
            }
        }
        None
    }

    /// Stored-space code for a query, `None` when it is wider than the
    /// shape's codes.
    #[inline]
    fn query_code(&self, code: u64) -> Option<u64> {
        (code & !low_mask(self.layout.geometry.code_bits()) == 0).then(|| self.index_code(code))
    }

    /// Occurrences of `code`; 0 when absent.
    pub fn count(&self, code: u64) -> u64 {
        self.query_code(code)
            .and_then(|c| self.locate(c))
            .map_or(0, |(n, _)| n)
    }

    pub fn contains(&self, code: u64) -> bool {
        self.query_code(code).and_then(|c| self.locate(c)).is_some()
    }

    /// Positions of `code`, or `None` if it is not indexed. The list is
    /// empty when the index was built without positions.
    pub fn lookup(&self, code: u64) -> Option<Vec<u64>> {
        let mut out = Vec::new();
        self.lookup_into(code, &mut out).then_some(out)
    }

    /// Append the positions of `code` to `out`; `false` if not indexed.
    pub fn lookup_into(&self, code: u64, out: &mut Vec<u64>) -> bool {
        self.query_code(code)
            .map_or(false, |c| self.append_stored(c, out))
    }

    fn append_stored(&self, stored: u64, out: &mut Vec<u64>) -> bool {
        let Some((count, mut reader)) = self.locate(stored) else {
            return false;
        };
        if self.layout.track_positions {
            out.reserve(count as usize);
            for _ in 0..count {
                match reader.get_bits(self.posn_width) {
                    Some(p) => out.push(p),
                    None => break,
                }
            }
        }
        true
    }

    /// Look up a k-mer given as bases.
    pub fn lookup_str(&self, kmer: &str) -> Result<Option<Vec<u64>>> {
        let (forward, reverse) = self.layout.shape.encode_str(kmer)?;
        let stored = if self.layout.canonical {
            forward.min(reverse)
        } else {
            forward
        };
        let mut out = Vec::new();
        Ok(self.append_stored(stored, &mut out).then_some(out))
    }

    /// Positions of every indexed k-mer within `max_errors` substituted
    /// bases of `code` (either strand on a canonical index), ascending.
    /// Codes wider than the shape match nothing.
    pub fn get_mismatch(&self, code: u64, max_errors: u32) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        self.get_mismatch_into(code, max_errors, &mut out)?;
        Ok(out)
    }

    /// Append mismatch hits to `out` (sorted) and return how many distinct
    /// indexed k-mers matched.
    pub fn get_mismatch_into(&self, code: u64, max_errors: u32, out: &mut Vec<u64>) -> Result<usize> {
        if max_errors == 0 || max_errors > MAX_ERRORS {
            return Err(IndexError::range(format!(
                "mismatch budget {} outside 1..={}",
                max_errors, MAX_ERRORS
            )));
        }
        if code & !low_mask(self.layout.geometry.code_bits()) != 0 {
            return Ok(0);
        }
        let weight = self.layout.shape.weight();
        let enumerator = self.mismatch[(max_errors - 1) as usize]
            .get_or_init(|| MismatchEnumerator::generate(weight, max_errors));

        let first = out.len();
        let mut seen = AHashSet::new();
        for neighbour in enumerator.neighbours(code) {
            let stored = self.index_code(neighbour);
            if seen.insert(stored) && !self.append_stored(stored, out) {
                seen.remove(&stored);
            }
        }
        out[first..].sort_unstable();
        Ok(seen.len())
    }

    /// All records in code order.
    pub fn records(&self) -> Records<'_> {
        Records {
            index: self,
            reader: BitReader::new(self.records.words(), self.records.len_bits()),
            bucket: 0,
        }
    }

    /// Combine two indexes of identical layout. Positions of `b` are
    /// shifted by `position_offset`, as if its input followed `a`'s.
    pub fn merge(a: &PositionIndex, b: &PositionIndex, position_offset: u64) -> Result<Self> {
        if a.layout != b.layout {
            return Err(IndexError::range(format!(
                "cannot merge indexes with different layouts ({:?} vs {:?})",
                a.layout.shape.describe(),
                b.layout.shape.describe()
            )));
        }
        let merged = MergedRecords {
            a: a.records().peekable(),
            b: b.records().peekable(),
            offset: position_offset,
        };
        Ok(Self::assemble(
            a.layout.clone(),
            merged,
            a.number_marked + b.number_marked,
        ))
    }

    /// Walk every bucket and check the records against the header values.
    pub(crate) fn verify(&self) -> Result<()> {
        let geometry = &self.layout.geometry;
        let check_bits = geometry.check_bits();
        if self.pointer(0) != 0 || self.pointer(geometry.buckets()) != self.records.len_bits() {
            return Err(IndexError::format("bucket pointers do not span the record data"));
        }

        let mut reader = BitReader::new(self.records.words(), self.records.len_bits());
        let mut counts = CountSummary::default();
        for bucket in 0..geometry.buckets() {
            let end = self.pointer(bucket + 1);
            if end < reader.position() {
                return Err(IndexError::format(format!("bucket {} pointer goes backwards", bucket)));
            }
            let mut previous: Option<u64> = None;
            while reader.position() < end {
                let corrupt = || IndexError::format(format!("record data in bucket {} is truncated", bucket));
                let check = reader.get_bits(check_bits).ok_or_else(corrupt)?;
                let count = reader.get_number().ok_or_else(corrupt)?;
                if count == 0 || previous.map_or(false, |p| p >= check) {
                    return Err(IndexError::format(format!("bucket {} records out of order", bucket)));
                }
                previous = Some(check);
                if self.layout.track_positions {
                    let mut last = None;
                    for _ in 0..count {
                        let p = reader.get_bits(self.posn_width).ok_or_else(corrupt)?;
                        if last.map_or(false, |l| l > p) {
                            return Err(IndexError::format(format!(
                                "positions out of order in bucket {}",
                                bucket
                            )));
                        }
                        last = Some(p);
                    }
                }
                counts.add(count);
            }
            if reader.position() != end {
                return Err(IndexError::format(format!("bucket {} overruns its pointer", bucket)));
            }
        }

        if counts.total != self.number_of_mers {
            return Err(IndexError::format(format!(
                "header declares {} mers, records hold {}",
                self.number_of_mers, counts.total
            )));
        }
        if counts != self.counts {
            return Err(IndexError::format("stored count summary disagrees with records"));
        }
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        let geometry = &self.layout.geometry;
        IndexStats {
            kind: IndexKind::Position,
            shape: self.layout.shape.describe(),
            canonical: self.layout.canonical,
            skip: self.layout.skip,
            track_positions: self.layout.track_positions,
            number_of_mers: self.number_of_mers,
            number_marked: self.number_marked,
            counts: self.counts,
            bucket_bits: geometry.bucket_bits(),
            check_bits: geometry.check_bits(),
            pointer_width: self.ptr_width,
            position_width: self.posn_width,
            table_bits: self.pointers.len_bits(),
            payload_bits: self.records.len_bits(),
            payload_bytes: self.pointers.byte_len() + self.records.byte_len(),
            false_positive_rate: None,
        }
    }
}

/// Iterator over the records of a [`PositionIndex`], in code order.
#[derive(Clone)]
pub struct Records<'a> {
    index: &'a PositionIndex,
    reader: BitReader<'a>,
    bucket: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = PositionRecord;

    fn next(&mut self) -> Option<PositionRecord> {
        let index = self.index;
        if self.reader.remaining() == 0 {
            return None;
        }
        while index.pointer(self.bucket + 1) <= self.reader.position() {
            self.bucket += 1;
        }
        let geometry = &index.layout.geometry;
        let check = self.reader.get_bits(geometry.check_bits())?;
        let count = self.reader.get_number()?;
        let positions = if index.layout.track_positions {
            (0..count)
                .map(|_| self.reader.get_bits(index.posn_width))
                .collect::<Option<Vec<u64>>>()?
        } else {
            Vec::new()
        };
        Some(PositionRecord {
            code: geometry.join(self.bucket, check),
            count,
            positions,
        })
    }
}

/// Code-ordered union of two record streams.
#[derive(Clone)]
struct MergedRecords<'a> {
    a: std::iter::Peekable<Records<'a>>,
    b: std::iter::Peekable<Records<'a>>,
    offset: u64,
}

impl<'a> Iterator for MergedRecords<'a> {
    type Item = PositionRecord;

    fn next(&mut self) -> Option<PositionRecord> {
        let shift = |mut r: PositionRecord, offset: u64| {
            r.positions.iter_mut().for_each(|p| *p += offset);
            r
        };
        match (self.a.peek(), self.b.peek()) {
            (None, None) => None,
            (Some(_), None) => self.a.next(),
            (None, Some(_)) => self.b.next().map(|r| shift(r, self.offset)),
            (Some(x), Some(y)) if x.code < y.code => self.a.next(),
            (Some(x), Some(y)) if x.code > y.code => self.b.next().map(|r| shift(r, self.offset)),
            _ => {
                let mut x = self.a.next()?;
                let y = shift(self.b.next()?, self.offset);
                x.count += y.count;
                x.positions.extend(y.positions);
                x.positions.sort_unstable();
                Some(x)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::source::MemorySource;
    use crate::kmer::codec::encode;

    fn options(bucket_bits: u32) -> BuildOptions {
        BuildOptions {
            canonical: true,
            track_positions: true,
            bucket_bits: Some(bucket_bits),
            max_memory_mb: None,
        }
    }

    fn index(seqs: &[&str], k: u32, opts: &BuildOptions) -> PositionIndex {
        let stream = KmerStream::new(
            MemorySource::from_sequences(seqs.iter().copied()),
            KmerShape::contiguous(k).unwrap(),
        );
        PositionIndex::build(&stream, opts, &BuildPolicy::Unrestricted).unwrap()
    }

    #[test]
    fn test_lookup_positions() {
        let idx = index(&["ACGTACGTNN", "ACGTACGA"], 4, &options(3));
        assert_eq!(idx.lookup(encode(b"ACGT").unwrap()), Some(vec![0, 4, 10]));
        // TACG and CGTA are each other's reverse complement.
        assert_eq!(idx.lookup(encode(b"CGTA").unwrap()), Some(vec![1, 3, 11, 13]));
        assert_eq!(idx.lookup(encode(b"TCGT").unwrap()), Some(vec![14]));
        assert_eq!(idx.lookup(encode(b"AAAA").unwrap()), None);
        assert_eq!(idx.count(encode(b"GTAC").unwrap()), 2);
        assert_eq!(idx.number_of_mers(), 10);
        idx.verify().unwrap();
    }

    #[test]
    fn test_lookup_str_and_out_of_range_code() {
        let idx = index(&["GATTACA"], 3, &options(2));
        assert_eq!(idx.lookup_str("TAC").unwrap(), Some(vec![3]));
        assert!(idx.lookup_str("TA").is_err());
        assert!(!idx.contains(1 << 40));
    }

    #[test]
    fn test_without_positions() {
        let opts = BuildOptions {
            track_positions: false,
            ..options(4)
        };
        let idx = index(&["AAAAAAAA"], 3, &opts);
        assert_eq!(idx.lookup(0), Some(vec![]));
        assert_eq!(idx.count(0), 6);
        assert_eq!(idx.lookup(encode(b"CCC").unwrap()), None);
        idx.verify().unwrap();
    }

    #[test]
    fn test_records_in_code_order() {
        let idx = index(&["ACGTTGCATGCA", "TTTTGGGG"], 5, &options(4));
        let recs: Vec<_> = idx.records().collect();
        assert_eq!(recs.len() as u64, idx.number_distinct());
        assert!(recs.windows(2).all(|w| w[0].code < w[1].code));
        let total: u64 = recs.iter().map(|r| r.count).sum();
        assert_eq!(total, idx.number_of_mers());
        for r in &recs {
            assert_eq!(idx.lookup(r.code).unwrap(), r.positions);
        }
    }

    #[test]
    fn test_every_bucket_width() {
        let seq = "ACGGTCAGTCCAGTTTGACCAGATTACAGGGACTTAG";
        let reference = index(&[seq], 6, &options(1));
        for b in 1..=12 {
            let idx = index(&[seq], 6, &options(b));
            idx.verify().unwrap();
            let a: Vec<_> = idx.records().collect();
            let r: Vec<_> = reference.records().collect();
            assert_eq!(a, r, "bucket bits {}", b);
        }
    }

    #[test]
    fn test_mismatch_lookup() {
        let idx = index(&["AAAAAAAACCCCGGGG"], 8, &options(6));
        let q = encode(b"AAAAAAAT").unwrap();
        // AAAAAAAA@0 and AAAAAAAC@1 are one substitution away.
        assert_eq!(idx.get_mismatch(q, 1).unwrap(), vec![0, 1]);
        assert_eq!(idx.get_mismatch(q, 2).unwrap(), vec![0, 1, 2]);
        assert!(idx.get_mismatch(q, 0).is_err());
        assert!(idx.get_mismatch(q, 4).is_err());

        // Bits above the code width match nothing, as in exact lookup.
        let wide = q | 1 << 16;
        assert_eq!(idx.lookup(wide), None);
        assert_eq!(idx.get_mismatch(wide, 1).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_merge_equals_rebuild() {
        let opts = options(5);
        let a = index(&["ACGTTGCANNGATTACA"], 4, &opts);
        let b = index(&["CCGGATTACAGT"], 4, &opts);
        let merged = PositionIndex::merge(&a, &b, 17).unwrap();
        let whole = index(&["ACGTTGCANNGATTACA", "CCGGATTACAGT"], 4, &opts);
        assert_eq!(merged, whole);

        let other = index(&["ACGTTGCA"], 4, &options(6));
        assert!(PositionIndex::merge(&a, &other, 0).is_err());
    }
}
