// src/kmer/seed.rs
//! Seed shapes: which bases of a window make up a k-mer code.
//!
//! A contiguous shape uses every base of a `k`-base window. A spaced seed is
//! described by a template such as `"1101011"`; only the `1` positions are
//! kept, and the selected 2-bit groups are compacted into a `2 × weight`-bit
//! code with one `(mask, shift)` pair per run of consecutive `1`s.
//! Either shape may additionally cap homopolymer runs before windowing.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::kmer::codec::{self, MAX_K, MAX_WIDE_K};

/// A spaced-seed template compiled into bit-extraction steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedMask {
    template: String,
    span: u32,
    weight: u32,
    /// `(mask over the window code, right shift)` per run of selected bases.
    runs: Vec<(u128, u32)>,
    symmetric: bool,
}

impl SeedMask {
    /// Compile a template of `1` (use), `0` or `x` (ignore).
    ///
    /// Leading and trailing ignored positions are trimmed.
    pub fn parse(template: &str) -> Result<Self> {
        if let Some(bad) = template.chars().find(|c| !matches!(c, '0' | '1' | 'x' | 'X')) {
            return Err(IndexError::InvalidSeed(format!(
                "template '{}' contains '{}'; only 1, 0 and x are allowed",
                template, bad
            )));
        }
        let trimmed = template.trim_matches(|c: char| c != '1');
        if trimmed.is_empty() {
            return Err(IndexError::InvalidSeed(format!(
                "template '{}' selects no bases",
                template
            )));
        }

        let selected: Vec<bool> = trimmed.chars().map(|c| c == '1').collect();
        let span = selected.len() as u32;
        let weight = selected.iter().filter(|&&s| s).count() as u32;
        if span > MAX_WIDE_K {
            return Err(IndexError::InvalidSeed(format!(
                "template span {} exceeds {} bases",
                span, MAX_WIDE_K
            )));
        }
        if weight > MAX_K {
            return Err(IndexError::InvalidSeed(format!(
                "template weight {} exceeds {} bases",
                weight, MAX_K
            )));
        }

        let mut runs = Vec::new();
        let mut rank = 0u32;
        let mut i = 0usize;
        while i < selected.len() {
            if !selected[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < selected.len() && selected[i] {
                i += 1;
            }
            let len = (i - start) as u32;
            let window_low = 2 * (span - i as u32);
            let code_low = 2 * (weight - rank - len);
            let mask = codec::code_mask_wide(len) << window_low;
            runs.push((mask, window_low - code_low));
            rank += len;
        }

        let symmetric = selected.iter().eq(selected.iter().rev());

        Ok(Self {
            template: trimmed.to_string(),
            span,
            weight,
            runs,
            symmetric,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Window length in bases.
    pub fn span(&self) -> u32 {
        self.span
    }

    /// Selected bases.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// A template that reads the same reversed; its reverse-complement code
    /// can be computed from the compact code alone.
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Compact the selected bases of a `span`-base window code.
    #[inline]
    pub fn extract(&self, window: u128) -> u64 {
        let mut code = 0u128;
        for &(mask, shift) in &self.runs {
            code |= (window & mask) >> shift;
        }
        code as u64
    }
}

/// Everything that determines how a base sequence turns into codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmerShape {
    span: u32,
    seed: Option<SeedMask>,
    max_run: Option<u32>,
}

impl KmerShape {
    pub fn contiguous(k: u32) -> Result<Self> {
        if k == 0 || k > MAX_K {
            return Err(IndexError::range(format!("k = {} outside 1..={}", k, MAX_K)));
        }
        Ok(Self {
            span: k,
            seed: None,
            max_run: None,
        })
    }

    pub fn spaced(template: &str) -> Result<Self> {
        let seed = SeedMask::parse(template)?;
        Ok(Self {
            span: seed.span(),
            seed: Some(seed),
            max_run: None,
        })
    }

    /// Keep at most `max_run` copies of each base in a homopolymer run.
    pub fn with_compression(mut self, max_run: u32) -> Result<Self> {
        if max_run == 0 {
            return Err(IndexError::InvalidSeed(
                "homopolymer compression must keep at least one base per run".to_string(),
            ));
        }
        self.max_run = Some(max_run);
        Ok(self)
    }

    pub fn span(&self) -> u32 {
        self.span
    }

    /// Bases contributing to the code.
    pub fn weight(&self) -> u32 {
        self.seed.as_ref().map_or(self.span, |s| s.weight())
    }

    /// Width of a code in bits.
    pub fn code_bits(&self) -> u32 {
        2 * self.weight()
    }

    pub fn seed(&self) -> Option<&SeedMask> {
        self.seed.as_ref()
    }

    pub fn max_run(&self) -> Option<u32> {
        self.max_run
    }

    pub fn template(&self) -> Option<&str> {
        self.seed.as_ref().map(|s| s.template())
    }

    /// Compact code of a `span`-base window.
    #[inline]
    pub fn extract(&self, window: u128) -> u64 {
        match &self.seed {
            Some(seed) => seed.extract(window),
            None => window as u64,
        }
    }

    /// Forward and reverse-complement codes of a `span`-base window.
    #[inline]
    pub fn codes(&self, window: u128) -> (u64, u64) {
        let rc = codec::reverse_complement_wide(window, self.span);
        (self.extract(window), self.extract(rc))
    }

    /// Reverse complement in code space, when the shape allows it.
    ///
    /// `None` for asymmetric spaced seeds: the reverse strand selects other
    /// window positions than the ones stored in the code.
    pub fn code_reverse_complement(&self, code: u64) -> Option<u64> {
        match &self.seed {
            Some(seed) if !seed.is_symmetric() => None,
            _ => Some(codec::reverse_complement(code, self.weight())),
        }
    }

    /// A canonical index maps queries through `code_reverse_complement`, so
    /// it rejects asymmetric spaced seeds.
    pub fn check_canonical(&self) -> Result<()> {
        match &self.seed {
            Some(seed) if !seed.is_symmetric() => Err(IndexError::range(format!(
                "canonical indexing needs a symmetric seed, not '{}'",
                seed.template()
            ))),
            _ => Ok(()),
        }
    }

    /// Codes of a query string of exactly `span` bases.
    pub fn encode_str(&self, s: &str) -> Result<(u64, u64)> {
        if s.len() != self.span as usize {
            return Err(IndexError::InvalidInput(format!(
                "k-mer '{}' has {} bases, the index uses windows of {}",
                s,
                s.len(),
                self.span
            )));
        }
        let window = codec::encode_wide(s.as_bytes()).ok_or_else(|| {
            IndexError::InvalidInput(format!("k-mer '{}' contains a non-ACGT base", s))
        })?;
        Ok(self.codes(window))
    }

    pub fn describe(&self) -> ShapeDescriptor {
        ShapeDescriptor {
            span: self.span,
            weight: self.weight(),
            template: self.template().map(str::to_string),
            max_run: self.max_run,
        }
    }
}

/// Serializable summary of a shape, used in statistics and file headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub span: u32,
    pub weight: u32,
    pub template: Option<String>,
    pub max_run: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::codec::{decode, encode, encode_wide};

    #[test]
    fn test_template_trimming() {
        let seed = SeedMask::parse("0x1101011x0").unwrap();
        assert_eq!(seed.template(), "1101011");
        assert_eq!(seed.span(), 7);
        assert_eq!(seed.weight(), 5);
        assert!(seed.is_symmetric());
        assert!(!SeedMask::parse("110101").unwrap().is_symmetric());
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(SeedMask::parse("0000"), Err(IndexError::InvalidSeed(_))));
        assert!(matches!(SeedMask::parse(""), Err(IndexError::InvalidSeed(_))));
        assert!(matches!(SeedMask::parse("11a1"), Err(IndexError::InvalidSeed(_))));
        assert!(SeedMask::parse(&"1".repeat(33)).is_err());
        assert!(SeedMask::parse(&format!("1{}1", "0".repeat(63))).is_err());
        assert!(SeedMask::parse(&format!("1{}1", "0".repeat(62))).is_ok());
    }

    #[test]
    fn test_extract_selects_template_bases() {
        let seed = SeedMask::parse("1101001").unwrap();
        let window = encode_wide(b"ACGTTGA").unwrap();
        // Positions 0, 1, 3, 6 -> A C T A
        assert_eq!(decode(seed.extract(window), 4), "ACTA");
    }

    #[test]
    fn test_all_ones_is_contiguous() {
        let spaced = KmerShape::spaced("111111").unwrap();
        let plain = KmerShape::contiguous(6).unwrap();
        let window = encode_wide(b"GATTAC").unwrap();
        assert_eq!(spaced.codes(window), plain.codes(window));
        assert_eq!(plain.codes(window).0, encode(b"GATTAC").unwrap());
    }

    #[test]
    fn test_symmetric_seed_reverse_complement_in_code_space() {
        let shape = KmerShape::spaced("1101011").unwrap();
        let window = encode_wide(b"ACGGTCA").unwrap();
        let (fwd, rc) = shape.codes(window);
        assert_eq!(shape.code_reverse_complement(fwd), Some(rc));

        let asym = KmerShape::spaced("1100111").unwrap();
        assert_eq!(asym.code_reverse_complement(0), None);
        assert!(shape.check_canonical().is_ok());
        assert!(matches!(asym.check_canonical(), Err(IndexError::Range(_))));
    }

    #[test]
    fn test_shape_limits() {
        assert!(KmerShape::contiguous(0).is_err());
        assert!(KmerShape::contiguous(33).is_err());
        assert_eq!(KmerShape::contiguous(32).unwrap().code_bits(), 64);
        let shape = KmerShape::contiguous(8).unwrap();
        assert!(shape.clone().with_compression(0).is_err());
        assert_eq!(shape.with_compression(2).unwrap().max_run(), Some(2));
    }

    #[test]
    fn test_encode_str() {
        let shape = KmerShape::contiguous(4).unwrap();
        let (fwd, rc) = shape.encode_str("AAAC").unwrap();
        assert_eq!(decode(fwd, 4), "AAAC");
        assert_eq!(decode(rc, 4), "GTTT");
        assert!(shape.encode_str("AAA").is_err());
        assert!(shape.encode_str("AANA").is_err());
    }
}
