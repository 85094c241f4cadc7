//! Index parameters, loadable from JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::build::BuildOptions;
use crate::error::{IndexError, Result};
use crate::index::exist::ExistenceKind;
use crate::kmer::seed::KmerShape;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Mer size; ignored when `template` is set.
    pub k: u32,
    /// Spaced seed template of `1`/`0`/`x`.
    pub template: Option<String>,
    /// Homopolymer run cap.
    pub compression: Option<u32>,
    /// `None` sizes the table from the input.
    pub bucket_bits: Option<u32>,
    pub canonical: bool,
    pub track_positions: bool,
    /// Emit one mer, then pass over `skip`.
    pub skip: u32,
    pub threads: usize,
    /// Target bases per build segment.
    pub segment_bases: u64,
    pub max_memory_mb: Option<u64>,
    /// Build existence indexes as Bloom filters with this false-positive rate.
    pub exist_fp_rate: Option<f64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            k: 20,
            template: None,
            compression: None,
            bucket_bits: None,
            canonical: true,
            track_positions: true,
            skip: 0,
            threads: num_cpus::get(),
            segment_bases: 4 << 20,
            max_memory_mb: None,
            exist_fp_rate: None,
        }
    }
}

impl IndexConfig {
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        serde_json::from_reader(reader).map_err(|e| {
            IndexError::InvalidInput(format!(
                "config {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Validated shape described by `k`, `template` and `compression`.
    pub fn shape(&self) -> Result<KmerShape> {
        let shape = match &self.template {
            Some(t) => KmerShape::spaced(t)?,
            None => KmerShape::contiguous(self.k)?,
        };
        let shape = match self.compression {
            Some(max_run) => shape.with_compression(max_run)?,
            None => shape,
        };
        if self.skip >= shape.span() {
            return Err(IndexError::range(format!(
                "mer skip {} must be less than the window of {} bases",
                self.skip,
                shape.span()
            )));
        }
        Ok(shape)
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            canonical: self.canonical,
            track_positions: self.track_positions,
            bucket_bits: self.bucket_bits,
            max_memory_mb: self.max_memory_mb,
        }
    }

    pub fn existence_kind(&self) -> Result<ExistenceKind> {
        let kind = match self.exist_fp_rate {
            None => ExistenceKind::Exact,
            Some(fp_rate) => ExistenceKind::Approximate { fp_rate },
        };
        kind.validate()?;
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let cfg = IndexConfig::default();
        assert_eq!(cfg.k, 20);
        assert!(cfg.canonical);
        assert!(cfg.threads >= 1);
        assert_eq!(cfg.shape().unwrap().span(), 20);
        assert_eq!(cfg.existence_kind().unwrap(), ExistenceKind::Exact);
    }

    #[test]
    fn test_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"k": 12, "skip": 3, "compression": 2}}"#).unwrap();
        let cfg = IndexConfig::from_json_path(file.path()).unwrap();
        assert_eq!(cfg.k, 12);
        assert_eq!(cfg.skip, 3);
        assert!(cfg.track_positions);
        assert_eq!(cfg.shape().unwrap().max_run(), Some(2));
    }

    #[test]
    fn test_invalid_values() {
        let cfg = IndexConfig {
            k: 4,
            skip: 4,
            ..Default::default()
        };
        assert!(matches!(cfg.shape(), Err(IndexError::Range(_))));

        let cfg = IndexConfig {
            template: Some("000".into()),
            ..Default::default()
        };
        assert!(matches!(cfg.shape(), Err(IndexError::InvalidSeed(_))));

        let cfg = IndexConfig {
            exist_fp_rate: Some(1.5),
            ..Default::default()
        };
        assert!(cfg.existence_kind().is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(
            IndexConfig::from_json_path(file.path()),
            Err(IndexError::InvalidInput(_))
        ));
    }
}
