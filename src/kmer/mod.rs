//! K-mer encoding, seed shapes and the k-mer stream.

pub mod builder;
pub mod codec;
pub mod seed;
pub mod stream;

pub use codec::{canonical, decode, encode, reverse_complement};
pub use seed::{KmerShape, SeedMask};
pub use stream::{KmerStream, Mer};
