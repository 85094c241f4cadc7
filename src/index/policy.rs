//! Which k-mers a position index keeps.

use crate::error::{IndexError, Result};
use crate::index::exist::ExistenceIndex;
use crate::kmer::seed::KmerShape;
use crate::kmer::stream::Mer;

/// One build policy per build; they do not combine.
#[derive(Clone, Copy, Debug)]
pub enum BuildPolicy<'a> {
    /// Every k-mer seen.
    Unrestricted,
    /// Only k-mers present in the filter.
    Include(&'a ExistenceIndex),
    /// Only k-mers absent from the filter.
    Exclude(&'a ExistenceIndex),
    /// Only k-mers whose multiplicity lies in `min_count..=max_count`.
    Threshold { min_count: u64, max_count: u64 },
}

impl<'a> BuildPolicy<'a> {
    /// Resolve command-line style options, rejecting combinations.
    pub fn from_options(
        include: Option<&'a ExistenceIndex>,
        exclude: Option<&'a ExistenceIndex>,
        min_count: Option<u64>,
        max_count: Option<u64>,
    ) -> Result<Self> {
        let threshold = min_count.is_some() || max_count.is_some();
        let requested: Vec<&str> = [
            include.map(|_| "include"),
            exclude.map(|_| "exclude"),
            threshold.then_some("threshold"),
        ]
        .into_iter()
        .flatten()
        .collect();
        if requested.len() > 1 {
            return Err(IndexError::PolicyConflict(requested.join(" + ")));
        }

        if let Some(filter) = include {
            return Ok(BuildPolicy::Include(filter));
        }
        if let Some(filter) = exclude {
            return Ok(BuildPolicy::Exclude(filter));
        }
        if threshold {
            let min_count = min_count.unwrap_or(1);
            let max_count = max_count.unwrap_or(u64::MAX);
            if min_count > max_count {
                return Err(IndexError::range(format!(
                    "min count {} exceeds max count {}",
                    min_count, max_count
                )));
            }
            return Ok(BuildPolicy::Threshold {
                min_count,
                max_count,
            });
        }
        Ok(BuildPolicy::Unrestricted)
    }

    /// Check a filter against the shape being indexed.
    pub fn validate(&self, shape: &KmerShape) -> Result<()> {
        match self {
            BuildPolicy::Include(f) | BuildPolicy::Exclude(f) if f.shape() != shape => {
                Err(IndexError::range(format!(
                    "filter index uses {:?}, the build uses {:?}",
                    f.shape().describe(),
                    shape.describe()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Per-occurrence decision for include/exclude; threshold decides later.
    #[inline]
    pub fn admits(&self, mer: &Mer) -> bool {
        match self {
            BuildPolicy::Include(f) => f.contains_mer(mer),
            BuildPolicy::Exclude(f) => !f.contains_mer(mer),
            BuildPolicy::Unrestricted | BuildPolicy::Threshold { .. } => true,
        }
    }

    /// Per-distinct-mer decision once its multiplicity is known.
    #[inline]
    pub fn keeps_count(&self, count: u64) -> bool {
        match *self {
            BuildPolicy::Threshold {
                min_count,
                max_count,
            } => min_count <= count && count <= max_count,
            _ => true,
        }
    }

    pub fn is_threshold(&self) -> bool {
        matches!(self, BuildPolicy::Threshold { .. })
    }
}
