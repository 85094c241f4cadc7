// src/kmer/builder.rs
//! Rolling window that turns a stream of bases into k-mer codes.

use crate::kmer::codec::{self, encode_base};
use crate::kmer::seed::KmerShape;

/// One complete window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub forward: u64,
    pub reverse: u64,
    /// Stream position of the window's first base.
    pub start: u64,
}

/// Rolling window state for one [`KmerShape`].
///
/// An invalid base empties the window, so the next code is produced only
/// after `span` further valid bases.
#[derive(Clone, Debug)]
pub struct KmerBuilder {
    shape: KmerShape,
    window: u128,
    mask: u128,
    filled: u32,
    last_base: Option<u8>,
    run: u32,
    /// Positions of the kept bases currently in the window.
    starts: [u64; 64],
    head: usize,
}

impl KmerBuilder {
    pub fn new(shape: KmerShape) -> Self {
        let mask = codec::code_mask_wide(shape.span());
        Self {
            shape,
            window: 0,
            mask,
            filled: 0,
            last_base: None,
            run: 0,
            starts: [0; 64],
            head: 0,
        }
    }

    pub fn shape(&self) -> &KmerShape {
        &self.shape
    }

    pub fn reset(&mut self) {
        self.window = 0;
        self.filled = 0;
        self.last_base = None;
        self.run = 0;
        self.head = 0;
    }

    /// Position of the oldest base in a partial or full window. Every
    /// window completed from here on starts at or after it.
    pub fn pending_start(&self) -> Option<u64> {
        if self.filled == 0 {
            return None;
        }
        let span = self.shape.span() as usize;
        let held = (self.filled as usize).min(span);
        let idx = (self.head + 64 - held) % 64;
        Some(self.starts[idx])
    }

    /// Feed one symbol seen at stream position `pos`.
    #[inline]
    pub fn push(&mut self, symbol: u8, pos: u64) -> Option<Window> {
        let base = match encode_base(symbol) {
            Some(b) => b,
            None => {
                self.reset();
                return None;
            }
        };

        if let Some(max_run) = self.shape.max_run() {
            if self.last_base == Some(base) {
                if self.run >= max_run {
                    return None;
                }
                self.run += 1;
            } else {
                self.last_base = Some(base);
                self.run = 1;
            }
        }

        self.window = ((self.window << 2) | base as u128) & self.mask;
        self.starts[self.head] = pos;
        self.head = (self.head + 1) % 64;
        let span = self.shape.span();
        if self.filled < span {
            self.filled += 1;
        }
        if self.filled < span {
            return None;
        }

        let (forward, reverse) = self.shape.codes(self.window);
        let start = self.starts[(self.head + 64 - span as usize) % 64];
        Some(Window {
            forward,
            reverse,
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::codec::decode;

    fn collect(shape: KmerShape, seq: &[u8]) -> Vec<(String, u64)> {
        let k = shape.weight();
        let mut b = KmerBuilder::new(shape);
        seq.iter()
            .enumerate()
            .filter_map(|(i, &s)| b.push(s, i as u64))
            .map(|w| (decode(w.forward, k), w.start))
            .collect()
    }

    #[test]
    fn test_contiguous_windows() {
        let got = collect(KmerShape::contiguous(3).unwrap(), b"ACGTA");
        assert_eq!(
            got,
            vec![("ACG".into(), 0), ("CGT".into(), 1), ("GTA".into(), 2)]
        );
    }

    #[test]
    fn test_invalid_base_refills() {
        let got = collect(KmerShape::contiguous(3).unwrap(), b"ACGNACGT");
        assert_eq!(
            got,
            vec![("ACG".into(), 0), ("ACG".into(), 4), ("CGT".into(), 5)]
        );
    }

    #[test]
    fn test_homopolymer_compression() {
        let shape = KmerShape::contiguous(3).unwrap().with_compression(1).unwrap();
        let got = collect(shape, b"AAACCGTTT");
        // Kept bases: A@0 C@3 G@5 T@6
        assert_eq!(got, vec![("ACG".into(), 0), ("CGT".into(), 3)]);

        let shape = KmerShape::contiguous(4).unwrap().with_compression(2).unwrap();
        let got = collect(shape, b"AAAACAAAG");
        // Kept bases: A@0 A@1 C@4 A@5 A@6 G@8
        assert_eq!(
            got,
            vec![("AACA".into(), 0), ("ACAA".into(), 1), ("CAAG".into(), 4)]
        );
    }

    #[test]
    fn test_spaced_window() {
        let shape = KmerShape::spaced("101").unwrap();
        let got = collect(shape, b"ACGTA");
        assert_eq!(
            got,
            vec![("AG".into(), 0), ("CT".into(), 1), ("GA".into(), 2)]
        );
    }

    #[test]
    fn test_reverse_is_reverse_complement() {
        let mut b = KmerBuilder::new(KmerShape::contiguous(4).unwrap());
        let w = b"AAAC"
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| b.push(s, i as u64))
            .last()
            .unwrap();
        assert_eq!(decode(w.reverse, 4), "GTTT");
    }

    #[test]
    fn test_pending_start() {
        let mut b = KmerBuilder::new(KmerShape::contiguous(3).unwrap());
        assert_eq!(b.pending_start(), None);
        b.push(b'A', 10);
        b.push(b'C', 11);
        assert_eq!(b.pending_start(), Some(10));
        b.push(b'G', 12);
        b.push(b'T', 13);
        assert_eq!(b.pending_start(), Some(11));
        b.push(b'N', 14);
        assert_eq!(b.pending_start(), None);
    }
}
