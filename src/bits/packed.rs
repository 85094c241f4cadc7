//! Fixed-width fields packed into `u64` words.
//!
//! Bit 0 of a packed array is the most significant bit of word 0, so a
//! field that straddles two words reads left to right across the boundary.

/// Mask with the low `width` bits set. `width` may be 0..=64.
#[inline]
pub fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Number of words needed to hold `bits` bits.
#[inline]
pub fn words_for_bits(bits: u64) -> usize {
    ((bits + 63) / 64) as usize
}

/// Number of bits needed to represent `value`; at least 1.
#[inline]
pub fn bits_needed(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

/// Read a `width`-bit field starting at bit `pos`.
///
/// The caller guarantees the field lies inside `words`.
#[inline]
pub fn get_bits(words: &[u64], pos: u64, width: u32) -> u64 {
    debug_assert!(width <= 64);
    if width == 0 {
        return 0;
    }
    let w = (pos / 64) as usize;
    let bit = (pos % 64) as u32;

    if bit + width <= 64 {
        (words[w] >> (64 - bit - width)) & low_mask(width)
    } else {
        let hi_bits = 64 - bit;
        let lo_bits = width - hi_bits;
        let hi = words[w] & low_mask(hi_bits);
        let lo = words[w + 1] >> (64 - lo_bits);
        (hi << lo_bits) | lo
    }
}

/// Write the low `width` bits of `value` at bit `pos`, leaving every other
/// bit of `words` untouched.
#[inline]
pub fn set_bits(words: &mut [u64], pos: u64, width: u32, value: u64) {
    debug_assert!(width <= 64);
    if width == 0 {
        return;
    }
    let value = value & low_mask(width);
    let w = (pos / 64) as usize;
    let bit = (pos % 64) as u32;

    if bit + width <= 64 {
        let shift = 64 - bit - width;
        let m = low_mask(width) << shift;
        words[w] = (words[w] & !m) | (value << shift);
    } else {
        let hi_bits = 64 - bit;
        let lo_bits = width - hi_bits;
        words[w] = (words[w] & !low_mask(hi_bits)) | (value >> lo_bits);
        let lo_shift = 64 - lo_bits;
        let m = low_mask(lo_bits) << lo_shift;
        words[w + 1] = (words[w + 1] & !m) | ((value & low_mask(lo_bits)) << lo_shift);
    }
}
