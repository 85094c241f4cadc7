//! Segment-parallel index construction.
//!
//! The input range is cut into segments of roughly `segment_bases` bases.
//! Workers claim segments, stream the k-mers starting inside each one into
//! a private arena, and hand the arena back when no segment is left. The
//! entries are then sorted as a whole, so the finished index does not
//! depend on which worker processed which segment.

use std::panic;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::bits::bits_needed;
use crate::build::arena::SegmentedArena;
use crate::build::coordinator::{CancelToken, SegmentCoordinator};
use crate::build::BuildOptions;
use crate::error::{IndexError, Result};
use crate::index::exist::{ExistenceIndex, ExistenceKind};
use crate::index::geometry::TableGeometry;
use crate::index::policy::BuildPolicy;
use crate::index::position::{IndexLayout, PositionIndex, PositionRecord};
use crate::io::source::SequenceSource;
use crate::kmer::stream::{KmerStream, Mer};

pub const DEFAULT_SEGMENT_BASES: u64 = 4 << 20;
const ARENA_CHUNK: usize = 1 << 16;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builds indexes from a [`KmerStream`] with a fixed number of workers.
#[derive(Clone, Debug)]
pub struct ConcurrentBuilder {
    threads: usize,
    segment_bases: u64,
    cancel: CancelToken,
}

/// What the workers collected.
struct Scan<T> {
    items: Vec<T>,
    /// Mers the visitor turned down.
    rejected: u64,
    segments: usize,
}

impl ConcurrentBuilder {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(IndexError::range("a build needs at least one thread"));
        }
        Ok(Self {
            threads,
            segment_bases: DEFAULT_SEGMENT_BASES,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_segment_bases(mut self, segment_bases: u64) -> Result<Self> {
        if segment_bases == 0 {
            return Err(IndexError::range("build segments must hold at least one base"));
        }
        self.segment_bases = segment_bases;
        Ok(self)
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// `[begin, end)` stream ranges covering the stream's own range.
    ///
    /// A skipping stream replays its record from the start on every ranged
    /// rewind, so its segments end on record boundaries and a long record
    /// becomes one segment.
    fn plan<S: SequenceSource>(&self, stream: &KmerStream<S>) -> Vec<(u64, u64)> {
        let source = stream.source();
        let total = source.total_bases();
        let (begin, end) = stream.range();
        let end = end.unwrap_or(u64::MAX).min(total);
        let mut segments = Vec::new();
        let mut from = begin;
        while from < end {
            let mut to = from.saturating_add(self.segment_bases).min(end);
            if stream.skip() > 0 {
                while to < end && source.sequence_start(to) <= from {
                    to = to.saturating_add(self.segment_bases).min(end);
                }
                if to < end {
                    to = source.sequence_start(to);
                }
            }
            segments.push((from, to));
            from = to;
        }
        segments
    }

    fn scan<S, T, F>(&self, stream: &KmerStream<S>, visit: F) -> Result<Scan<T>>
    where
        S: SequenceSource,
        T: Send,
        F: Fn(&Mer) -> Option<T> + Sync,
    {
        let segments = self.plan(stream);
        let coordinator = SegmentCoordinator::new(segments.len());
        let workers = self.threads.min(segments.len()).max(1);
        debug!(
            "Scanning {} segments of up to {} bases with {} workers",
            segments.len(),
            self.segment_bases,
            workers
        );

        let streams: Vec<KmerStream<S>> = (0..workers).map(|_| stream.clone()).collect();
        let (segments_ref, coordinator_ref, cancel, visit) =
            (&segments, &coordinator, &self.cancel, &visit);

        let joined = crossbeam::scope(|s| {
            let handles: Vec<_> = streams
                .into_iter()
                .map(|mut worker_stream| {
                    s.spawn(move |_| -> Result<(SegmentedArena<T>, u64)> {
                        let mut arena = SegmentedArena::new(ARENA_CHUNK);
                        let mut rejected = 0u64;
                        while let Some(claim) = coordinator_ref.claim(cancel) {
                            let (begin, end) = segments_ref[claim.segment()];
                            worker_stream.set_range(begin, end)?;
                            let before = arena.len();
                            while let Some(mer) = worker_stream.next() {
                                match visit(&mer) {
                                    Some(item) => arena.push(item),
                                    None => rejected += 1,
                                }
                            }
                            debug!(
                                "Segment {} [{}, {}) produced {} entries",
                                claim.segment(),
                                begin,
                                end,
                                arena.len() - before
                            );
                            claim.complete();
                        }
                        Ok((arena, rejected))
                    })
                })
                .collect();

            let waited = coordinator_ref.wait_all(cancel, POLL_INTERVAL);
            let results: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
            (waited, results)
        });
        let (waited, results) = joined.unwrap_or_else(|e| panic::resume_unwind(e));

        let mut parts = Vec::with_capacity(results.len());
        for result in results {
            parts.push(result.unwrap_or_else(|e| panic::resume_unwind(e))?);
        }
        waited?;

        let total: usize = parts.iter().map(|(arena, _)| arena.len()).sum();
        let mut items = Vec::with_capacity(total);
        let mut rejected = 0;
        for (arena, r) in parts {
            arena.drain_into(&mut items);
            rejected += r;
        }
        Ok(Scan {
            items,
            rejected,
            segments: segments.len(),
        })
    }

    /// Build a position index over every k-mer of `stream` that `policy`
    /// admits.
    pub fn build_position<S: SequenceSource>(
        &self,
        stream: &KmerStream<S>,
        options: &BuildOptions,
        policy: &BuildPolicy<'_>,
    ) -> Result<PositionIndex> {
        let shape = stream.shape().clone();
        if options.canonical {
            shape.check_canonical()?;
        }
        policy.validate(&shape)?;
        let started = Instant::now();

        let geometry = match options.bucket_bits {
            Some(b) => TableGeometry::new(shape.code_bits(), b)?,
            None => {
                let posn_width = if options.track_positions {
                    bits_needed(stream.source().total_bases())
                } else {
                    0
                };
                TableGeometry::auto(
                    shape.code_bits(),
                    stream.approximate_number_of_mers(),
                    posn_width,
                    options.max_memory_mb,
                )?
            }
        };
        info!(
            "Building position index: span {}, weight {}, {} bucket bits, {} threads",
            shape.span(),
            shape.weight(),
            geometry.bucket_bits(),
            self.threads
        );

        let canonical = options.canonical;
        let scan = self.scan(stream, |mer| {
            policy
                .admits(mer)
                .then(|| (mer.code(canonical), mer.position))
        })?;
        let mut entries = scan.items;
        entries.par_sort_unstable();
        debug!("Sorted {} entries from {} segments", entries.len(), scan.segments);

        let mut marked = scan.rejected;
        if policy.is_threshold() {
            marked += EntryGroups::new(&entries, false)
                .filter(|r| !policy.keeps_count(r.count))
                .map(|r| r.count)
                .sum::<u64>();
        }

        let layout = IndexLayout {
            shape,
            canonical,
            skip: stream.skip(),
            track_positions: options.track_positions,
            geometry,
        };
        let records = EntryGroups::new(&entries, options.track_positions)
            .filter(move |r| policy.keeps_count(r.count));
        let index = PositionIndex::assemble(layout, records, marked);

        let counts = &index.counts;
        info!(
            "Indexed {} mers ({} distinct, {} unique, max count {}), {} marked in {:.2?}",
            counts.total,
            counts.distinct,
            counts.unique,
            counts.max_count,
            marked,
            started.elapsed()
        );
        Ok(index)
    }

    /// Build an existence index over every k-mer of `stream`.
    pub fn build_existence<S: SequenceSource>(
        &self,
        stream: &KmerStream<S>,
        canonical: bool,
        kind: ExistenceKind,
    ) -> Result<ExistenceIndex> {
        if canonical {
            stream.shape().check_canonical()?;
        }
        kind.validate()?;
        let started = Instant::now();
        let scan = self.scan(stream, |mer| Some(mer.code(canonical)))?;
        let mut codes = scan.items;
        codes.par_sort_unstable();
        codes.dedup();

        let index = ExistenceIndex::from_codes(
            stream.shape().clone(),
            canonical,
            stream.skip(),
            codes,
            kind,
        )?;
        info!(
            "Existence index holds {} distinct mers ({}) after {:.2?}",
            index.len(),
            if index.is_exact() { "exact" } else { "approximate" },
            started.elapsed()
        );
        Ok(index)
    }
}

/// Groups sorted `(code, position)` entries into records.
#[derive(Clone)]
struct EntryGroups<'a> {
    rest: &'a [(u64, u64)],
    track_positions: bool,
}

impl<'a> EntryGroups<'a> {
    fn new(entries: &'a [(u64, u64)], track_positions: bool) -> Self {
        Self {
            rest: entries,
            track_positions,
        }
    }
}

impl Iterator for EntryGroups<'_> {
    type Item = PositionRecord;

    fn next(&mut self) -> Option<PositionRecord> {
        let code = self.rest.first()?.0;
        let n = self.rest.iter().take_while(|e| e.0 == code).count();
        let (group, rest) = self.rest.split_at(n);
        self.rest = rest;
        Some(PositionRecord {
            code,
            count: n as u64,
            positions: if self.track_positions {
                group.iter().map(|e| e.1).collect()
            } else {
                Vec::new()
            },
        })
    }
}
