//! Append-only storage grown in fixed-size chunks.
//!
//! A worker collecting millions of entries never reallocates and copies
//! what it already holds; the chunks are stitched together once at the end.

/// Entries grouped into chunks of `per_segment`; entry `i` lives in chunk
/// `i / per_segment` at offset `i % per_segment`.
#[derive(Clone, Debug)]
pub struct SegmentedArena<T> {
    segments: Vec<Vec<T>>,
    per_segment: usize,
    len: usize,
}

impl<T> SegmentedArena<T> {
    pub fn new(per_segment: usize) -> Self {
        Self {
            segments: Vec::new(),
            per_segment: per_segment.max(1),
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        if self.len % self.per_segment == 0 {
            self.segments.push(Vec::with_capacity(self.per_segment));
        }
        let last = self.segments.len() - 1;
        self.segments[last].push(value);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move every entry into `out`, in insertion order.
    pub fn drain_into(self, out: &mut Vec<T>) {
        out.reserve(self.len);
        for segment in self.segments {
            out.extend(segment);
        }
    }
}
