//! Parallel construction of existence and position indexes.

pub mod arena;
pub mod coordinator;
pub mod parallel;

pub use arena::SegmentedArena;
pub use coordinator::{CancelToken, SegmentCoordinator};
pub use parallel::ConcurrentBuilder;

/// Table options for a position index build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    /// Store `min(forward, reverse complement)` codes.
    pub canonical: bool,
    pub track_positions: bool,
    /// `None` sizes the table from the input.
    pub bucket_bits: Option<u32>,
    /// Cap for automatic sizing.
    pub max_memory_mb: Option<u64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            canonical: true,
            track_positions: true,
            bucket_bits: None,
            max_memory_mb: None,
        }
    }
}
