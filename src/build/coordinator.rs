//! Segment claiming for build workers.
//!
//! Workers claim segment numbers from a shared counter and mark them done;
//! both live under one mutex. The coordinating thread waits on a condition
//! variable with a timeout, so it wakes on progress and otherwise polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::{IndexError, Result};

/// Shared flag that stops a build at its next segment claim.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ClaimState {
    next_segment: usize,
    done: Vec<bool>,
    finished: usize,
    abandoned: usize,
}

impl ClaimState {
    /// Every claimed segment has been finished or abandoned.
    fn settled(&self) -> bool {
        self.finished + self.abandoned == self.next_segment
    }
}

#[derive(Debug)]
pub struct SegmentCoordinator {
    state: Mutex<ClaimState>,
    progress: Condvar,
    segments: usize,
}

impl SegmentCoordinator {
    pub fn new(segments: usize) -> Self {
        Self {
            state: Mutex::new(ClaimState {
                next_segment: 0,
                done: vec![false; segments],
                finished: 0,
                abandoned: 0,
            }),
            progress: Condvar::new(),
            segments,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClaimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next unclaimed segment; `None` when all are claimed, a worker failed,
    /// or the build was cancelled.
    pub fn claim(&self, cancel: &CancelToken) -> Option<SegmentClaim<'_>> {
        let mut state = self.lock();
        if cancel.is_cancelled() || state.abandoned > 0 || state.next_segment >= self.segments {
            return None;
        }
        let segment = state.next_segment;
        state.next_segment += 1;
        Some(SegmentClaim {
            coordinator: self,
            segment,
            completed: false,
        })
    }

    fn finish(&self, segment: usize) {
        let mut state = self.lock();
        if !std::mem::replace(&mut state.done[segment], true) {
            state.finished += 1;
        }
        self.progress.notify_all();
    }

    fn abandon(&self, segment: usize) {
        let mut state = self.lock();
        debug!("Segment {} abandoned", segment);
        state.abandoned += 1;
        self.progress.notify_all();
    }

    /// Block until every segment is done, or until the build stops early
    /// and the segments in flight have settled.
    pub fn wait_all(&self, cancel: &CancelToken, poll: Duration) -> Result<()> {
        let mut state = self.lock();
        let mut reported = 0;
        loop {
            if state.finished == self.segments {
                return Ok(());
            }
            let stopped = cancel.is_cancelled() || state.abandoned > 0;
            if stopped && state.settled() {
                return if state.abandoned > 0 {
                    Err(IndexError::range(format!(
                        "{} of {} build segments failed",
                        state.abandoned, self.segments
                    )))
                } else {
                    Err(IndexError::Cancelled)
                };
            }
            if state.finished != reported {
                reported = state.finished;
                debug!("{}/{} segments done", reported, self.segments);
            }
            state = self
                .progress
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// A claimed segment; dropping it without [`complete`](Self::complete)
/// abandons the segment and stops further claims.
#[derive(Debug)]
pub struct SegmentClaim<'a> {
    coordinator: &'a SegmentCoordinator,
    segment: usize,
    completed: bool,
}

impl SegmentClaim<'_> {
    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn complete(mut self) {
        self.completed = true;
        self.coordinator.finish(self.segment);
    }
}

impl Drop for SegmentClaim<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.coordinator.abandon(self.segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_claims_each_segment_once() {
        let coord = SegmentCoordinator::new(50);
        let cancel = CancelToken::new();
        let claimed = Mutex::new(Vec::new());
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some(claim) = coord.claim(&cancel) {
                        claimed.lock().unwrap().push(claim.segment());
                        claim.complete();
                    }
                });
            }
            coord.wait_all(&cancel, POLL).unwrap();
        });
        let mut claimed = claimed.into_inner().unwrap();
        claimed.sort_unstable();
        assert_eq!(claimed, (0..50).collect::<Vec<_>>());
        let state = coord.lock();
        assert_eq!(state.finished, 50);
        assert!(state.done.iter().all(|&d| d));
    }

    #[test]
    fn test_cancel_stops_claims() {
        let coord = SegmentCoordinator::new(10);
        let cancel = CancelToken::new();
        let first = coord.claim(&cancel).unwrap();
        cancel.cancel();
        assert!(coord.claim(&cancel).is_none());
        first.complete();
        assert!(matches!(coord.wait_all(&cancel, POLL), Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_abandoned_segment_fails_the_build() {
        let coord = SegmentCoordinator::new(3);
        let cancel = CancelToken::new();
        drop(coord.claim(&cancel).unwrap());
        assert!(coord.claim(&cancel).is_none());
        assert_eq!(coord.lock().done, vec![false; 3]);
        assert!(matches!(coord.wait_all(&cancel, POLL), Err(IndexError::Range(_))));
    }

    #[test]
    fn test_empty_plan_is_done() {
        let coord = SegmentCoordinator::new(0);
        coord.wait_all(&CancelToken::new(), POLL).unwrap();
    }
}
