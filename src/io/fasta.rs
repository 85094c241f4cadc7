// src/io/fasta.rs
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::io::source::MemorySource;

/// Open a sequence file for reading, handles gzipped files automatically
pub fn open_sequence_file(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().map_or(false, |e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read every record of a FASTA or FASTQ stream. The format is picked from
/// the first non-empty line.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<(String, Vec<u8>)>> {
    let mut lines = reader.lines();
    let mut records = Vec::new();

    let first = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Ok(records),
        }
    };

    if let Some(name) = first.strip_prefix('>') {
        let mut name = name.trim().to_string();
        let mut seq = Vec::new();
        for line in lines {
            let line = line?;
            let line = line.trim_end();
            if let Some(next) = line.strip_prefix('>') {
                records.push((std::mem::take(&mut name), std::mem::take(&mut seq)));
                name = next.trim().to_string();
            } else {
                seq.extend_from_slice(line.as_bytes());
            }
        }
        records.push((name, seq));
    } else if let Some(name) = first.strip_prefix('@') {
        let mut header = Some(name.trim().to_string());
        while let Some(name) = header.take() {
            let seq = match lines.next() {
                Some(l) => l?,
                None => return Err(truncated(&name)),
            };
            let plus = match lines.next() {
                Some(l) => l?,
                None => return Err(truncated(&name)),
            };
            if !plus.starts_with('+') {
                return Err(IndexError::InvalidInput(format!(
                    "FASTQ record '{}' is missing its '+' line",
                    name
                )));
            }
            let qual = match lines.next() {
                Some(l) => l?,
                None => return Err(truncated(&name)),
            };
            if qual.trim_end().len() != seq.trim_end().len() {
                return Err(IndexError::InvalidInput(format!(
                    "FASTQ record '{}' has {} bases but {} quality values",
                    name,
                    seq.trim_end().len(),
                    qual.trim_end().len()
                )));
            }
            records.push((name, seq.trim_end().as_bytes().to_vec()));

            for line in lines.by_ref() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match line.strip_prefix('@') {
                    Some(next) => header = Some(next.trim().to_string()),
                    None => {
                        return Err(IndexError::InvalidInput(format!(
                            "expected a FASTQ header, found '{}'",
                            line
                        )))
                    }
                }
                break;
            }
        }
    } else {
        return Err(IndexError::InvalidInput(format!(
            "not FASTA or FASTQ: first line is '{}'",
            first
        )));
    }
    Ok(records)
}

fn truncated(name: &str) -> IndexError {
    IndexError::InvalidInput(format!("FASTQ record '{}' is truncated", name))
}

/// Load one or more sequence files into a single in-memory source, records
/// in file order.
pub fn load_sequences<P: AsRef<Path>>(paths: &[P]) -> Result<MemorySource> {
    let mut all = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let records = read_records(open_sequence_file(path)?)?;
        debug!("Read {} records from {}", records.len(), path.display());
        all.extend(records);
    }
    Ok(MemorySource::from_records(all))
}
