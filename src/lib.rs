//! Bit-packed k-mer indexes.
//!
//! [`kmer::KmerStream`] turns sequence records into k-mer codes,
//! [`index::ExistenceIndex`] answers set membership and
//! [`index::PositionIndex`] maps each k-mer to the positions where it occurs,
//! with exact and bounded-mismatch lookup. Both are built in parallel by
//! [`build::ConcurrentBuilder`] and persist to a self-checking file format.

pub mod bits;
pub mod build;
pub mod config;
pub mod error;
pub mod index;
pub mod io;
pub mod kmer;
pub mod stats;

pub use build::{BuildOptions, CancelToken, ConcurrentBuilder};
pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use index::{BuildPolicy, ExistenceIndex, ExistenceKind, PositionIndex};
pub use io::{load_sequences, MemorySource, SequenceSource};
pub use kmer::{KmerShape, KmerStream, Mer};
