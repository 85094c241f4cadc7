//! Sequential bit cursors with fixed-width fields and self-delimiting numbers.
//!
//! `BitStream` owns its storage and supports both directions plus `seek`,
//! the way the index builders fill tables. `BitReader` borrows a finished
//! word array and is what concurrent queries use, since it never mutates.
//!
//! Numbers use a continuation scheme tuned for skewed counts: each chunk is
//! `NUMBER_CHUNK_WIDTH` bits, the top bit flags the last chunk and the rest
//! carry data, least significant group first. A count of one costs 5 bits.

use std::io::{self, Read, Write};

use crate::bits::packed::{get_bits, low_mask, set_bits, words_for_bits};
use crate::error::{IndexError, Result};

/// Width of one chunk of a variable-length number, terminal flag included.
pub const NUMBER_CHUNK_WIDTH: u32 = 5;
const NUMBER_DATA_BITS: u32 = NUMBER_CHUNK_WIDTH - 1;
const NUMBER_MAX_CHUNKS: u32 = (64 + NUMBER_DATA_BITS - 1) / NUMBER_DATA_BITS;
const NUMBER_LAST: u64 = 1 << NUMBER_DATA_BITS;

/// Bits `put_number(value)` will consume.
pub fn number_width(value: u64) -> u64 {
    let significant = 64 - value.leading_zeros();
    let chunks = ((significant + NUMBER_DATA_BITS - 1) / NUMBER_DATA_BITS).max(1);
    (chunks * NUMBER_CHUNK_WIDTH) as u64
}

#[inline]
fn read_field(words: &[u64], len: u64, cursor: &mut u64, width: u32) -> Option<u64> {
    assert!(width <= 64, "field width {} exceeds 64 bits", width);
    if len - (*cursor).min(len) < width as u64 {
        return None;
    }
    let v = get_bits(words, *cursor, width);
    *cursor += width as u64;
    Some(v)
}

#[inline]
fn read_number(words: &[u64], len: u64, cursor: &mut u64) -> Option<u64> {
    let start = *cursor;
    let mut value = 0u64;
    for i in 0..NUMBER_MAX_CHUNKS {
        let chunk = match read_field(words, len, cursor, NUMBER_CHUNK_WIDTH) {
            Some(c) => c,
            None => {
                *cursor = start;
                return None;
            }
        };
        value |= (chunk & low_mask(NUMBER_DATA_BITS)) << (i * NUMBER_DATA_BITS);
        if chunk & NUMBER_LAST != 0 {
            return Some(value);
        }
    }
    // No terminal flag within the longest legal encoding.
    *cursor = start;
    None
}

/// Growable bit buffer with a read/write cursor.
#[derive(Clone, Debug, Default)]
pub struct BitStream {
    words: Vec<u64>,
    len: u64,
    cursor: u64,
}

/// Streams are equal when they hold the same bits; the cursor is ignored.
impl PartialEq for BitStream {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.words[..] == other.words[..]
    }
}

impl Eq for BitStream {}

impl BitStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bits(bits: u64) -> Self {
        Self {
            words: Vec::with_capacity(words_for_bits(bits)),
            len: 0,
            cursor: 0,
        }
    }

    /// Wrap existing words holding `len_bits` valid bits.
    pub fn from_words(mut words: Vec<u64>, len_bits: u64) -> Result<Self> {
        if words_for_bits(len_bits) > words.len() {
            return Err(IndexError::range(format!(
                "{} bits do not fit in {} words",
                len_bits,
                words.len()
            )));
        }
        words.truncate(words_for_bits(len_bits));
        Ok(Self {
            words,
            len: len_bits,
            cursor: 0,
        })
    }

    /// Logical length in bits (the highest bit ever written).
    pub fn len_bits(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Move the cursor to an absolute bit offset inside the stream.
    pub fn seek(&mut self, bit: u64) -> Result<()> {
        if bit > self.len {
            return Err(IndexError::range(format!(
                "seek to bit {} past end of {}-bit stream",
                bit, self.len
            )));
        }
        self.cursor = bit;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u64> {
        self.words
    }

    /// Borrowing read-only cursor positioned at bit 0.
    pub fn reader(&self) -> BitReader<'_> {
        BitReader::new(&self.words, self.len)
    }

    /// Write the low `width` bits of `value` at the cursor.
    pub fn put_bits(&mut self, value: u64, width: u32) {
        assert!(width <= 64, "field width {} exceeds 64 bits", width);
        let end = self.cursor + width as u64;
        let need = words_for_bits(end);
        if self.words.len() < need {
            self.words.resize(need, 0);
        }
        set_bits(&mut self.words, self.cursor, width, value);
        self.cursor = end;
        self.len = self.len.max(end);
    }

    pub fn put_number(&mut self, mut value: u64) {
        loop {
            let data = value & low_mask(NUMBER_DATA_BITS);
            value >>= NUMBER_DATA_BITS;
            if value == 0 {
                self.put_bits(NUMBER_LAST | data, NUMBER_CHUNK_WIDTH);
                return;
            }
            self.put_bits(data, NUMBER_CHUNK_WIDTH);
        }
    }

    /// Read `width` bits; `None` when fewer than `width` bits remain.
    pub fn get_bits(&mut self, width: u32) -> Option<u64> {
        read_field(&self.words, self.len, &mut self.cursor, width)
    }

    /// Read one number; `None` at end of stream. The cursor does not move
    /// when the read fails.
    pub fn get_number(&mut self) -> Option<u64> {
        read_number(&self.words, self.len, &mut self.cursor)
    }

    /// Persist as big-endian bytes, rounded up to the containing byte.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let nbytes = ((self.len + 7) / 8) as usize;
        let mut bytes = Vec::with_capacity(nbytes);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.truncate(nbytes);
        w.write_all(&bytes)
    }

    /// Inverse of `write_to` for a stream of `len_bits` bits.
    pub fn read_from<R: Read>(r: &mut R, len_bits: u64) -> io::Result<Self> {
        let nbytes = ((len_bits + 7) / 8) as usize;
        let mut bytes = vec![0u8; nbytes];
        r.read_exact(&mut bytes)?;

        let mut words = vec![0u64; words_for_bits(len_bits)];
        for (i, chunk) in bytes.chunks(8).enumerate() {
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            words[i] = u64::from_be_bytes(buf);
        }
        Ok(Self {
            words,
            len: len_bits,
            cursor: 0,
        })
    }

    /// Bytes `write_to` produces.
    pub fn byte_len(&self) -> u64 {
        (self.len + 7) / 8
    }
}

/// Read-only cursor over packed words.
#[derive(Clone, Copy, Debug)]
pub struct BitReader<'a> {
    words: &'a [u64],
    len: u64,
    cursor: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(words: &'a [u64], len_bits: u64) -> Self {
        debug_assert!(words_for_bits(len_bits) <= words.len());
        Self {
            words,
            len: len_bits,
            cursor: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn remaining(&self) -> u64 {
        self.len - self.cursor.min(self.len)
    }

    pub fn seek(&mut self, bit: u64) -> Result<()> {
        if bit > self.len {
            return Err(IndexError::range(format!(
                "seek to bit {} past end of {}-bit stream",
                bit, self.len
            )));
        }
        self.cursor = bit;
        Ok(())
    }

    /// Advance without decoding; `false` if that would pass the end.
    pub fn skip(&mut self, bits: u64) -> bool {
        if self.remaining() < bits {
            return false;
        }
        self.cursor += bits;
        true
    }

    pub fn get_bits(&mut self, width: u32) -> Option<u64> {
        read_field(self.words, self.len, &mut self.cursor, width)
    }

    pub fn get_number(&mut self) -> Option<u64> {
        read_number(self.words, self.len, &mut self.cursor)
    }
}
