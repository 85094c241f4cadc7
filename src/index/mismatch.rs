//! Error masks for bounded-mismatch lookup.
//!
//! A mask names the base slots of a code that may differ from the query.
//! For a budget of `e` substitutions over `weight` slots the enumerator
//! produces every set of 1..=e slots once, in lexicographic slot order. A
//! concrete substitution under a mask must change the base at every slot it
//! names; a pattern that keeps the query's base at some slot is the same
//! correction as one from a smaller mask and is rejected. Together with the
//! exact code, each neighbour at distance `j ≤ e` is thus produced exactly
//! once.

use crate::error::{IndexError, Result};

pub const MAX_ERRORS: u32 = 3;

/// Base slots allowed to vary. Slot 0 is the first base, the most
/// significant pair of the code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMask {
    slots: Vec<u32>,
    bits: u64,
}

impl ErrorMask {
    fn new(slots: Vec<u32>, weight: u32) -> Self {
        let bits = slots
            .iter()
            .fold(0u64, |m, &s| m | (0b11u64 << slot_shift(s, weight)));
        Self { slots, bits }
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// The 2-bit groups of the slots, set.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }
}

#[inline]
fn slot_shift(slot: u32, weight: u32) -> u32 {
    2 * (weight - 1 - slot)
}

/// All error masks for one code width and error budget.
#[derive(Clone, Debug)]
pub struct MismatchEnumerator {
    weight: u32,
    max_errors: u32,
    masks: Vec<ErrorMask>,
}

impl MismatchEnumerator {
    pub fn new(weight: u32, max_errors: u32) -> Result<Self> {
        if max_errors == 0 || max_errors > MAX_ERRORS {
            return Err(IndexError::range(format!(
                "mismatch budget {} outside 1..={}",
                max_errors, MAX_ERRORS
            )));
        }
        if weight == 0 || weight > 32 {
            return Err(IndexError::range(format!("code of {} bases", weight)));
        }
        Ok(Self::generate(weight, max_errors))
    }

    /// `new` without the argument checks.
    pub(crate) fn generate(weight: u32, max_errors: u32) -> Self {
        let mut masks = Vec::with_capacity(closed_form_count(weight, max_errors) as usize);
        let mut slots = Vec::with_capacity(max_errors as usize);
        for size in 1..=max_errors.min(weight) {
            combinations(weight, size, 0, &mut slots, &mut |s: &[u32]| {
                masks.push(ErrorMask::new(s.to_vec(), weight))
            });
        }
        Self {
            weight,
            max_errors,
            masks,
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    pub fn masks(&self) -> &[ErrorMask] {
        &self.masks
    }

    /// Every code that differs from `query` at exactly the slots of `mask`.
    pub fn substitutions<'m>(
        &self,
        mask: &'m ErrorMask,
        query: u64,
    ) -> impl Iterator<Item = u64> + 'm {
        let weight = self.weight;
        let n = mask.size();
        let cleared = query & !mask.bits;
        (0..(1u64 << (2 * n))).filter_map(move |pattern| {
            let mut code = cleared;
            for (i, &slot) in mask.slots.iter().enumerate() {
                let shift = slot_shift(slot, weight);
                let base = (pattern >> (2 * i)) & 0b11;
                if base == (query >> shift) & 0b11 {
                    return None;
                }
                code |= base << shift;
            }
            Some(code)
        })
    }

    /// The query and every code within the budget, each once.
    pub fn neighbours(&self, query: u64) -> impl Iterator<Item = u64> + '_ {
        std::iter::once(query).chain(
            self.masks
                .iter()
                .flat_map(move |m| self.substitutions(m, query)),
        )
    }
}

fn combinations(n: u32, size: u32, from: u32, acc: &mut Vec<u32>, emit: &mut dyn FnMut(&[u32])) {
    if acc.len() as u32 == size {
        emit(acc);
        return;
    }
    let needed = size - acc.len() as u32;
    for s in from..=(n - needed) {
        acc.push(s);
        combinations(n, size, s + 1, acc, emit);
        acc.pop();
    }
}

/// Number of distinct masks: `Σ_{j=1..e} C(weight, j)`.
pub fn closed_form_count(weight: u32, max_errors: u32) -> u64 {
    (1..=max_errors.min(weight)).map(|j| binomial(weight as u64, j as u64)).sum()
}

fn binomial(n: u64, k: u64) -> u64 {
    (0..k).fold(1u64, |acc, i| acc * (n - i) / (i + 1))
}
