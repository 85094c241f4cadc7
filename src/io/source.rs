//! Sequence sources: where a k-mer stream gets its bases from.
//!
//! Every source presents its records as one coordinate space: the stream
//! position of a symbol is its offset in the concatenation of all records.

use std::sync::Arc;

/// A symbol read from a source, valid base or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub base: u8,
    pub position: u64,
    pub seq_id: u32,
    /// Offset inside the record.
    pub seq_offset: u64,
}

impl Symbol {
    #[inline]
    pub fn is_valid(&self) -> bool {
        crate::kmer::codec::encode_base(self.base).is_some()
    }
}

/// Anything a [`KmerStream`](crate::kmer::stream::KmerStream) can read.
///
/// Sources are cloned once per build worker, so clones should share their
/// backing data.
pub trait SequenceSource: Clone + Send {
    /// Next symbol, or `None` at the end of the source.
    fn next_symbol(&mut self) -> Option<Symbol>;

    fn rewind(&mut self);

    /// Move to stream position `position`; past the end means exhausted.
    fn seek(&mut self, position: u64);

    /// Total symbols over all records.
    fn total_bases(&self) -> u64;

    fn sequence_count(&self) -> usize;

    /// Stream position of the first symbol of the record containing
    /// `position`.
    fn sequence_start(&self, position: u64) -> u64;
}

#[derive(Debug, Default)]
struct SequenceData {
    bases: Vec<u8>,
    starts: Vec<u64>,
    names: Vec<String>,
}

/// Records held in memory behind an `Arc`.
#[derive(Clone, Debug)]
pub struct MemorySource {
    data: Arc<SequenceData>,
    cursor: u64,
    record: usize,
}

impl MemorySource {
    pub fn from_records<I, N, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<[u8]>,
    {
        let mut data = SequenceData::default();
        for (name, seq) in records {
            data.starts.push(data.bases.len() as u64);
            data.names.push(name.into());
            data.bases.extend_from_slice(seq.as_ref());
        }
        Self {
            data: Arc::new(data),
            cursor: 0,
            record: 0,
        }
    }

    /// Unnamed records, called `seq0`, `seq1`, ...
    pub fn from_sequences<I, S>(seqs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self::from_records(
            seqs.into_iter()
                .enumerate()
                .map(|(i, s)| (format!("seq{}", i), s)),
        )
    }

    pub fn name(&self, seq_id: usize) -> Option<&str> {
        self.data.names.get(seq_id).map(String::as_str)
    }

    pub fn sequence(&self, seq_id: usize) -> Option<&[u8]> {
        let start = *self.data.starts.get(seq_id)? as usize;
        let end = self
            .data
            .starts
            .get(seq_id + 1)
            .map_or(self.data.bases.len(), |&e| e as usize);
        Some(&self.data.bases[start..end])
    }

    /// Record holding `position`; with empty records, the last one starting
    /// at or before it.
    fn record_of(&self, position: u64) -> usize {
        self.data
            .starts
            .partition_point(|&s| s <= position)
            .saturating_sub(1)
    }
}

impl SequenceSource for MemorySource {
    #[inline]
    fn next_symbol(&mut self) -> Option<Symbol> {
        let base = *self.data.bases.get(self.cursor as usize)?;
        while self
            .data
            .starts
            .get(self.record + 1)
            .map_or(false, |&s| s <= self.cursor)
        {
            self.record += 1;
        }
        let sym = Symbol {
            base,
            position: self.cursor,
            seq_id: self.record as u32,
            seq_offset: self.cursor - self.data.starts[self.record],
        };
        self.cursor += 1;
        Some(sym)
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.record = 0;
    }

    fn seek(&mut self, position: u64) {
        self.cursor = position.min(self.total_bases());
        self.record = self.record_of(self.cursor);
    }

    fn total_bases(&self) -> u64 {
        self.data.bases.len() as u64
    }

    fn sequence_count(&self) -> usize {
        self.data.starts.len()
    }

    fn sequence_start(&self, position: u64) -> u64 {
        self.data
            .starts
            .get(self.record_of(position))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_carry_record_coordinates() {
        let mut src = MemorySource::from_sequences(["ACG", "", "TT"]);
        let syms: Vec<_> = std::iter::from_fn(|| src.next_symbol()).collect();
        assert_eq!(syms.len(), 5);
        assert_eq!((syms[2].position, syms[2].seq_id, syms[2].seq_offset), (2, 0, 2));
        assert_eq!((syms[3].position, syms[3].seq_id, syms[3].seq_offset), (3, 2, 0));
        assert_eq!(src.sequence_count(), 3);
    }

    #[test]
    fn test_seek_and_rewind() {
        let mut src = MemorySource::from_sequences(["ACGT", "NNGG"]);
        src.seek(5);
        let s = src.next_symbol().unwrap();
        assert_eq!((s.base, s.seq_id, s.seq_offset), (b'N', 1, 1));
        assert!(!s.is_valid());
        assert_eq!(src.sequence_start(6), 4);
        assert_eq!(src.sequence_start(3), 0);

        src.seek(100);
        assert!(src.next_symbol().is_none());
        src.rewind();
        assert_eq!(src.next_symbol().unwrap().base, b'A');
    }

    #[test]
    fn test_record_accessors() {
        let src = MemorySource::from_records([("chr1", "ACGT"), ("chr2", "GG")]);
        assert_eq!(src.name(1), Some("chr2"));
        assert_eq!(src.sequence(0), Some(b"ACGT".as_slice()));
        assert_eq!(src.sequence(1), Some(b"GG".as_slice()));
        assert_eq!(src.sequence(2), None);
    }
}
