// src/kmer/codec.rs
//! 2-bit base encoding, reverse complement and canonical codes.
//!
//! Codes are LSB-aligned: a k-mer occupies the low `2k` bits, first base in
//! the most significant pair. `u64` codes hold k ≤ 32; the `_wide` variants
//! use `u128` for windows of up to 64 bases (spaced-seed spans).

use crate::error::{IndexError, Result};

pub const MAX_K: u32 = 32;
pub const MAX_WIDE_K: u32 = 64;

const INVALID: u8 = 0xFF;

/// ASCII to 2-bit code (A=0, C=1, G=2, T=3), `INVALID` for anything else.
pub static BASE_CODE: [u8; 256] = {
    let mut t = [INVALID; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

const CODE_BASE: [u8; 4] = [b'A', b'C', b'G', b'T'];

#[inline]
pub fn encode_base(b: u8) -> Option<u8> {
    let v = BASE_CODE[b as usize];
    if v == INVALID {
        None
    } else {
        Some(v)
    }
}

#[inline]
pub fn decode_base(code: u64) -> u8 {
    CODE_BASE[(code & 0b11) as usize]
}

/// Mask covering the low `2k` bits of a `u64` code.
#[inline]
pub fn code_mask(k: u32) -> u64 {
    debug_assert!(k <= MAX_K);
    if k >= MAX_K {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

#[inline]
pub fn code_mask_wide(k: u32) -> u128 {
    debug_assert!(k <= MAX_WIDE_K);
    if k >= MAX_WIDE_K {
        u128::MAX
    } else {
        (1u128 << (2 * k)) - 1
    }
}

/// Encode a k-mer of at most 32 bases. `None` on any non-ACGT byte.
pub fn encode(seq: &[u8]) -> Option<u64> {
    if seq.len() > MAX_K as usize {
        return None;
    }
    let mut code = 0u64;
    for &b in seq {
        code = (code << 2) | encode_base(b)? as u64;
    }
    Some(code)
}

pub fn encode_wide(seq: &[u8]) -> Option<u128> {
    if seq.len() > MAX_WIDE_K as usize {
        return None;
    }
    let mut code = 0u128;
    for &b in seq {
        code = (code << 2) | encode_base(b)? as u128;
    }
    Some(code)
}

/// Like `encode`, but reports what was wrong with the string.
pub fn parse_kmer(s: &str) -> Result<u64> {
    if s.is_empty() || s.len() > MAX_K as usize {
        return Err(IndexError::range(format!(
            "k-mer '{}' has length {}, expected 1..={}",
            s,
            s.len(),
            MAX_K
        )));
    }
    encode(s.as_bytes())
        .ok_or_else(|| IndexError::InvalidInput(format!("k-mer '{}' contains a non-ACGT base", s)))
}

/// Render the low `2k` bits of `code` as bases.
pub fn decode(code: u64, k: u32) -> String {
    (0..k)
        .rev()
        .map(|i| decode_base(code >> (2 * i)) as char)
        .collect()
}

pub fn decode_wide(code: u128, k: u32) -> String {
    (0..k)
        .rev()
        .map(|i| decode_base((code >> (2 * i)) as u64) as char)
        .collect()
}

/// Reverse complement of a k-mer code.
///
/// The 2-bit groups are reversed with swap-and-mask steps at 2, 4, 8, 16 and
/// 32 bit granularity, every bit is complemented, and the result is shifted
/// down so only the low `2k` bits remain.
#[inline]
pub fn reverse_complement(code: u64, k: u32) -> u64 {
    debug_assert!(k >= 1 && k <= MAX_K);
    let mut x = code;
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    x = ((x >> 8) & 0x00FF_00FF_00FF_00FF) | ((x & 0x00FF_00FF_00FF_00FF) << 8);
    x = ((x >> 16) & 0x0000_FFFF_0000_FFFF) | ((x & 0x0000_FFFF_0000_FFFF) << 16);
    x = (x >> 32) | (x << 32);
    (!x) >> (64 - 2 * k)
}

/// `reverse_complement` for windows of up to 64 bases.
#[inline]
pub fn reverse_complement_wide(code: u128, k: u32) -> u128 {
    debug_assert!(k >= 1 && k <= MAX_WIDE_K);
    const M2: u128 = 0x3333_3333_3333_3333_3333_3333_3333_3333;
    const M4: u128 = 0x0F0F_0F0F_0F0F_0F0F_0F0F_0F0F_0F0F_0F0F;
    const M8: u128 = 0x00FF_00FF_00FF_00FF_00FF_00FF_00FF_00FF;
    const M16: u128 = 0x0000_FFFF_0000_FFFF_0000_FFFF_0000_FFFF;
    const M32: u128 = 0x0000_0000_FFFF_FFFF_0000_0000_FFFF_FFFF;
    let mut x = code;
    x = ((x >> 2) & M2) | ((x & M2) << 2);
    x = ((x >> 4) & M4) | ((x & M4) << 4);
    x = ((x >> 8) & M8) | ((x & M8) << 8);
    x = ((x >> 16) & M16) | ((x & M16) << 16);
    x = ((x >> 32) & M32) | ((x & M32) << 32);
    x = (x >> 64) | (x << 64);
    (!x) >> (128 - 2 * k)
}

/// Smaller of a code and its reverse complement.
#[inline]
pub fn canonical(code: u64, k: u32) -> u64 {
    code.min(reverse_complement(code, k))
}

#[inline]
pub fn canonical_wide(code: u128, k: u32) -> u128 {
    code.min(reverse_complement_wide(code, k))
}

/// Number of bases at which two k-mer codes differ.
#[inline]
pub fn base_distance(a: u64, b: u64) -> u32 {
    let x = a ^ b;
    ((x | (x >> 1)) & 0x5555_5555_5555_5555).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference reverse complement, one base at a time.
    fn naive_rc(code: u64, k: u32) -> u64 {
        let mut rc = 0u64;
        for i in 0..k {
            let base = (code >> (2 * i)) & 0b11;
            rc = (rc << 2) | (base ^ 0b11);
        }
        rc
    }

    #[test]
    fn test_encode_decode() {
        let code = encode(b"ACGT").unwrap();
        assert_eq!(code, 0b00_01_10_11);
        assert_eq!(decode(code, 4), "ACGT");
        assert_eq!(encode(b"acgt"), Some(code));
        assert_eq!(encode(b"ACNT"), None);
        assert_eq!(encode(&[b'A'; 33]), None);
    }

    #[test]
    fn test_reverse_complement_matches_naive() {
        let samples = [0u64, 1, 0x1B, 0xDEAD_BEEF, 0x0123_4567_89AB_CDEF, u64::MAX];
        for k in 1..=MAX_K {
            for &s in &samples {
                let code = s & code_mask(k);
                assert_eq!(reverse_complement(code, k), naive_rc(code, k), "k={}", k);
            }
        }
    }

    #[test]
    fn test_reverse_complement_strings() {
        let code = encode(b"AACGTT").unwrap();
        assert_eq!(decode(reverse_complement(code, 6), 6), "AACGTT");
        let code = encode(b"AAAC").unwrap();
        assert_eq!(decode(reverse_complement(code, 4), 4), "GTTT");
        assert_eq!(canonical(encode(b"GTTT").unwrap(), 4), code);
    }

    #[test]
    fn test_wide_agrees_with_narrow() {
        let seq = b"ACGTTGCAAGGCTTACGATCGATCGGATCCAT";
        let narrow = encode(seq).unwrap();
        let wide = encode_wide(seq).unwrap();
        assert_eq!(wide as u64, narrow);
        assert_eq!(reverse_complement_wide(wide, 32) as u64, reverse_complement(narrow, 32));

        let long = [seq.as_slice(), seq.as_slice()].concat();
        let w = encode_wide(&long).unwrap();
        let rc = reverse_complement_wide(w, 64);
        assert_eq!(reverse_complement_wide(rc, 64), w);
        assert_eq!(decode_wide(w, 64).as_bytes(), long.as_slice());
    }

    #[test]
    fn test_parse_kmer_errors() {
        assert!(matches!(parse_kmer("ACGN"), Err(IndexError::InvalidInput(_))));
        assert!(matches!(parse_kmer(""), Err(IndexError::Range(_))));
        assert_eq!(parse_kmer("TTTT").unwrap(), 0xFF);
    }

    #[test]
    fn test_base_distance() {
        let a = encode(b"ACGTACGT").unwrap();
        let b = encode(b"ACGAACTT").unwrap();
        assert_eq!(base_distance(a, a), 0);
        assert_eq!(base_distance(a, b), 2);
    }
}
