//! Existence and position indexes over k-mer codes.

pub mod bloom;
pub mod exist;
pub mod geometry;
pub mod mismatch;
pub mod persist;
pub mod policy;
pub mod position;

pub use bloom::BloomFilter;
pub use exist::{ExactSet, ExistenceIndex, ExistenceKind, Membership};
pub use geometry::TableGeometry;
pub use mismatch::{ErrorMask, MismatchEnumerator, MAX_ERRORS};
pub use persist::{file_kind, FileKind, EXISTENCE_MAGIC, POSITION_MAGIC};
pub use policy::BuildPolicy;
pub use position::{PositionIndex, PositionRecord, Records};
