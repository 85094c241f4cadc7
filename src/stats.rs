use serde::{Deserialize, Serialize};

use crate::kmer::seed::ShapeDescriptor;

/// Multiplicity totals over the records of an index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSummary {
    /// Occurrences indexed.
    pub total: u64,
    pub distinct: u64,
    /// Mers seen exactly once.
    pub unique: u64,
    /// Occurrences belonging to mers seen more than once.
    pub non_unique_entries: u64,
    pub max_count: u64,
}

impl CountSummary {
    #[inline]
    pub fn add(&mut self, count: u64) {
        self.total += count;
        self.distinct += 1;
        if count == 1 {
            self.unique += 1;
        } else {
            self.non_unique_entries += count;
        }
        self.max_count = self.max_count.max(count);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Position,
    ExistenceExact,
    ExistenceApproximate,
}

/// What `merindex stats` prints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub shape: ShapeDescriptor,
    pub canonical: bool,
    pub skip: u32,
    pub track_positions: bool,
    pub number_of_mers: u64,
    pub number_marked: u64,
    pub counts: CountSummary,
    pub bucket_bits: u32,
    pub check_bits: u32,
    pub pointer_width: u32,
    pub position_width: u32,
    pub table_bits: u64,
    pub payload_bits: u64,
    pub payload_bytes: u64,
    pub false_positive_rate: Option<f64>,
}

impl IndexStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
