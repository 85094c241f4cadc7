// src/kmer/stream.rs
//! K-mer stream over a [`SequenceSource`].

use crate::error::{IndexError, Result};
use crate::io::source::SequenceSource;
use crate::kmer::builder::KmerBuilder;
use crate::kmer::seed::KmerShape;

/// One k-mer occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mer {
    pub forward: u64,
    pub reverse: u64,
    /// Stream position of the first base.
    pub position: u64,
    pub seq_id: u32,
    /// Position inside the record.
    pub seq_offset: u64,
}

impl Mer {
    #[inline]
    pub fn canonical(&self) -> u64 {
        self.forward.min(self.reverse)
    }

    /// Code stored by an index that is or is not canonical.
    #[inline]
    pub fn code(&self, canonical: bool) -> u64 {
        if canonical {
            self.canonical()
        } else {
            self.forward
        }
    }
}

/// Consecutive k-mers of a source, optionally restricted to the ones that
/// start inside `[begin, end)` in stream coordinates.
#[derive(Clone, Debug)]
pub struct KmerStream<S: SequenceSource> {
    source: S,
    builder: KmerBuilder,
    skip: u32,
    skip_left: u32,
    begin: u64,
    end: Option<u64>,
    seq_id: Option<u32>,
    seq_start: u64,
    done: bool,
}

impl<S: SequenceSource> KmerStream<S> {
    pub fn new(source: S, shape: KmerShape) -> Self {
        let mut stream = Self {
            source,
            builder: KmerBuilder::new(shape),
            skip: 0,
            skip_left: 0,
            begin: 0,
            end: None,
            seq_id: None,
            seq_start: 0,
            done: false,
        };
        stream.rewind();
        stream
    }

    /// After each emitted k-mer, pass over `skip` more. The phase restarts
    /// at every record.
    pub fn with_skip(mut self, skip: u32) -> Result<Self> {
        if skip >= self.builder.shape().span() {
            return Err(IndexError::range(format!(
                "mer skip {} must be less than the window of {} bases",
                skip,
                self.builder.shape().span()
            )));
        }
        self.skip = skip;
        self.rewind();
        Ok(self)
    }

    pub fn shape(&self) -> &KmerShape {
        self.builder.shape()
    }

    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current restriction; `None` as the end means "to the end of input".
    pub fn range(&self) -> (u64, Option<u64>) {
        (self.begin, self.end)
    }

    /// Restart from the beginning of the current range.
    pub fn rewind(&mut self) {
        self.builder.reset();
        self.seq_id = None;
        self.skip_left = 0;
        self.done = false;

        // Symbols before `begin` are read only to rebuild state: the run
        // length under compression, the skip phase when skipping.
        let from = if self.begin == 0 {
            0
        } else if self.skip > 0 {
            self.source.sequence_start(self.begin)
        } else {
            let lookback = self.builder.shape().max_run().unwrap_or(0) as u64;
            self.begin
                .saturating_sub(lookback)
                .max(self.source.sequence_start(self.begin))
        };
        if from == 0 {
            self.source.rewind();
        } else {
            self.source.seek(from);
        }
    }

    /// Only produce k-mers whose first base lies in `[begin, end)`.
    pub fn set_range(&mut self, begin: u64, end: u64) -> Result<()> {
        if begin > end {
            return Err(IndexError::range(format!(
                "range [{}, {}) is reversed",
                begin, end
            )));
        }
        self.begin = begin;
        self.end = Some(end);
        self.rewind();
        Ok(())
    }

    /// Drop any range restriction.
    pub fn clear_range(&mut self) {
        self.begin = 0;
        self.end = None;
        self.rewind();
    }

    /// Size estimate for progress reporting and table sizing: the range
    /// length when restricted, otherwise the source length.
    pub fn approximate_number_of_mers(&self) -> u64 {
        let total = self.source.total_bases();
        match self.end {
            Some(end) => end.min(total).saturating_sub(self.begin.min(total)),
            None => total,
        }
    }

    /// Next k-mer, or `None` when the range or source is exhausted.
    pub fn next(&mut self) -> Option<Mer> {
        if self.done {
            return None;
        }
        let end = self.end.unwrap_or(u64::MAX);
        loop {
            let sym = match self.source.next_symbol() {
                Some(s) => s,
                None => {
                    self.done = true;
                    return None;
                }
            };

            if self.seq_id != Some(sym.seq_id) {
                self.seq_id = Some(sym.seq_id);
                self.seq_start = sym.position - sym.seq_offset;
                self.builder.reset();
                self.skip_left = 0;
            }

            if sym.position >= end && self.builder.pending_start().map_or(true, |s| s >= end) {
                self.done = true;
                return None;
            }

            let window = match self.builder.push(sym.base, sym.position) {
                Some(w) => w,
                None => continue,
            };
            if window.start >= end {
                self.done = true;
                return None;
            }

            if self.skip_left > 0 {
                self.skip_left -= 1;
                continue;
            }
            self.skip_left = self.skip;

            if window.start < self.begin {
                continue;
            }
            return Some(Mer {
                forward: window.forward,
                reverse: window.reverse,
                position: window.start,
                seq_id: sym.seq_id,
                seq_offset: window.start - self.seq_start,
            });
        }
    }
}

impl<S: SequenceSource> Iterator for KmerStream<S> {
    type Item = Mer;

    fn next(&mut self) -> Option<Mer> {
        KmerStream::next(self)
    }
}
