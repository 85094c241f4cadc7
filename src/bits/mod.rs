//! Bit-packed storage: fixed-width fields in `u64` words and the cursors
//! that read and write them.

pub mod packed;
pub mod stream;

pub use packed::{bits_needed, low_mask};
pub use stream::{number_width, BitReader, BitStream, NUMBER_CHUNK_WIDTH};
