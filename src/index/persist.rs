//! On-disk format for position and existence indexes.
//!
//! ```text
//! magic[16]            "merindex.posDBv1" / "merindex.existv1", last byte '?'
//!                      until the whole file has been written and flushed
//! number_of_mers u64
//! number_marked  u64
//! parameter block      shape, flags, field widths, stream lengths in bits
//! payload              bit streams, big-endian bytes, each byte-rounded
//! ```
//!
//! All integers outside the bit streams are little-endian. A file is
//! either loaded completely and verified, or rejected.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use crate::bits::BitStream;
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::bloom::{BloomFilter, MAX_HASHES};
use crate::index::exist::{ExactSet, ExistenceIndex, Membership};
use crate::index::geometry::TableGeometry;
use crate::index::position::{IndexLayout, PositionIndex};
use crate::kmer::seed::KmerShape;
use crate::stats::CountSummary;

pub const POSITION_MAGIC: &[u8; 16] = b"merindex.posDBv1";
pub const EXISTENCE_MAGIC: &[u8; 16] = b"merindex.existv1";

const MAGIC_LEN: usize = 16;
/// Byte of the magic holding the format version.
const VERSION_BYTE: usize = MAGIC_LEN - 1;
const UNFINISHED: u8 = b'?';

const TAG_EXACT: u8 = 0;
const TAG_BLOOM: u8 = 1;

/// Longest template a file may declare; spaced seeds span at most 64 bases.
const MAX_TEMPLATE_LEN: u32 = 64;

/// Which index a file holds, judged by its magic alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Position,
    Existence,
}

pub fn file_kind<P: AsRef<Path>>(path: P) -> Result<FileKind> {
    let path = path.as_ref();
    let mut magic = [0u8; MAGIC_LEN];
    File::open(path)?.read_exact(&mut magic).map_err(truncated)?;
    if magic[..VERSION_BYTE] == POSITION_MAGIC[..VERSION_BYTE] {
        Ok(FileKind::Position)
    } else if magic[..VERSION_BYTE] == EXISTENCE_MAGIC[..VERSION_BYTE] {
        Ok(FileKind::Existence)
    } else {
        Err(IndexError::format(format!("{} is not an index file", path.display())))
    }
}

fn truncated(e: io::Error) -> IndexError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        IndexError::format("file is truncated")
    } else {
        IndexError::Io(e)
    }
}

fn check_canonical_shape(shape: &KmerShape, canonical: bool) -> Result<()> {
    if canonical {
        shape
            .check_canonical()
            .map_err(|e| IndexError::format(e.to_string()))?;
    }
    Ok(())
}

fn flag(byte: u8, what: &str) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(IndexError::format(format!("{} flag has value {}", what, b))),
    }
}

/// Write `magic` with the unfinished sentinel, the header and `body`, then
/// patch the magic once everything is on disk.
fn write_file<F>(path: &Path, magic: &[u8; 16], header: (u64, u64), body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let mut pending = *magic;
    pending[VERSION_BYTE] = UNFINISHED;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&pending)?;
    writer.write_u64::<LE>(header.0)?;
    writer.write_u64::<LE>(header.1)?;
    body(&mut writer)?;
    writer.flush()?;

    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(magic)?;
    file.sync_all()?;
    Ok(())
}

/// An opened index file positioned after the header.
struct IndexFile {
    reader: BufReader<File>,
    len: u64,
    number_of_mers: u64,
    number_marked: u64,
}

impl IndexFile {
    fn open(path: &Path, magic: &[u8; 16]) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut found = [0u8; MAGIC_LEN];
        reader.read_exact(&mut found).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => IndexError::format(format!(
                "{} is too short to hold an index",
                path.display()
            )),
            _ => IndexError::Io(e),
        })?;
        if found[..VERSION_BYTE] != magic[..VERSION_BYTE] {
            return Err(IndexError::format(format!(
                "{} is not a {} file",
                path.display(),
                String::from_utf8_lossy(&magic[..VERSION_BYTE - 1])
            )));
        }
        if found[VERSION_BYTE] == UNFINISHED {
            return Err(IndexError::format(format!(
                "{} was not completely written",
                path.display()
            )));
        }
        if found[VERSION_BYTE] != magic[VERSION_BYTE] {
            return Err(IndexError::format(format!(
                "{} has unsupported format version '{}'",
                path.display(),
                found[VERSION_BYTE] as char
            )));
        }

        let number_of_mers = reader.read_u64::<LE>().map_err(truncated)?;
        let number_marked = reader.read_u64::<LE>().map_err(truncated)?;
        Ok(Self {
            reader,
            len,
            number_of_mers,
            number_marked,
        })
    }

    /// Check that exactly `payload_bytes` remain.
    fn expect_payload(&mut self, payload_bytes: u64) -> Result<()> {
        let remaining = self.len.saturating_sub(self.reader.stream_position()?);
        if remaining < payload_bytes {
            return Err(IndexError::format(format!(
                "payload is {} bytes, header declares {}",
                remaining, payload_bytes
            )));
        }
        if remaining > payload_bytes {
            return Err(IndexError::format(format!(
                "{} trailing bytes after the payload",
                remaining - payload_bytes
            )));
        }
        Ok(())
    }

    fn stream(&mut self, len_bits: u64) -> Result<BitStream> {
        BitStream::read_from(&mut self.reader, len_bits).map_err(truncated)
    }
}

fn write_shape<W: Write>(w: &mut W, shape: &KmerShape) -> io::Result<()> {
    w.write_u32::<LE>(shape.span())?;
    w.write_u32::<LE>(shape.weight())?;
    w.write_u32::<LE>(shape.max_run().unwrap_or(0))?;
    let template = shape.template().unwrap_or("");
    w.write_u32::<LE>(template.len() as u32)?;
    w.write_all(template.as_bytes())
}

fn read_shape<R: Read>(r: &mut R) -> Result<KmerShape> {
    let span = r.read_u32::<LE>().map_err(truncated)?;
    let weight = r.read_u32::<LE>().map_err(truncated)?;
    let max_run = r.read_u32::<LE>().map_err(truncated)?;
    let template_len = r.read_u32::<LE>().map_err(truncated)?;
    if template_len > MAX_TEMPLATE_LEN {
        return Err(IndexError::format(format!(
            "seed template of {} characters",
            template_len
        )));
    }
    let mut template = vec![0u8; template_len as usize];
    r.read_exact(&mut template).map_err(truncated)?;

    let bad_shape = |e: IndexError| IndexError::format(format!("stored k-mer shape is invalid: {}", e));
    let shape = if template.is_empty() {
        KmerShape::contiguous(span).map_err(bad_shape)?
    } else {
        let template = String::from_utf8(template)
            .map_err(|_| IndexError::format("seed template is not text"))?;
        KmerShape::spaced(&template).map_err(bad_shape)?
    };
    let shape = match max_run {
        0 => shape,
        n => shape.with_compression(n).map_err(bad_shape)?,
    };
    if shape.span() != span || shape.weight() != weight {
        return Err(IndexError::format(format!(
            "stored shape declares span {} weight {}, template gives {} and {}",
            span,
            weight,
            shape.span(),
            shape.weight()
        )));
    }
    Ok(shape)
}

fn read_skip<R: Read>(r: &mut R, shape: &KmerShape) -> Result<u32> {
    let skip = r.read_u32::<LE>().map_err(truncated)?;
    if skip >= shape.span() {
        return Err(IndexError::format(format!(
            "stored mer skip {} is not below the span {}",
            skip,
            shape.span()
        )));
    }
    Ok(skip)
}

fn read_width<R: Read>(r: &mut R, what: &str, min: u32) -> Result<u32> {
    let width = r.read_u32::<LE>().map_err(truncated)?;
    if width < min || width > 64 {
        return Err(IndexError::format(format!("{} width {} bits", what, width)));
    }
    Ok(width)
}

fn read_geometry<R: Read>(r: &mut R, shape: &KmerShape) -> Result<TableGeometry> {
    let bucket_bits = r.read_u32::<LE>().map_err(truncated)?;
    TableGeometry::new(shape.code_bits(), bucket_bits)
        .map_err(|e| IndexError::format(format!("stored table geometry is invalid: {}", e)))
}

/// Pointer tables hold one entry per bucket plus the end sentinel.
fn check_pointer_bits(geometry: &TableGeometry, ptr_width: u32, pointer_bits: u64) -> Result<()> {
    let expected = (geometry.buckets() as u64 + 1) * ptr_width as u64;
    if pointer_bits != expected {
        return Err(IndexError::format(format!(
            "pointer table of {} bits, geometry needs {}",
            pointer_bits, expected
        )));
    }
    Ok(())
}

fn byte_len(bits: u64) -> u64 {
    (bits + 7) / 8
}

impl PositionIndex {
    /// Persist the index; loading the file yields an identical index.
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(
            "Saving position index ({} mers, {} distinct) to {}",
            self.number_of_mers,
            self.counts.distinct,
            path.display()
        );
        let layout = &self.layout;
        write_file(
            path,
            POSITION_MAGIC,
            (self.number_of_mers, self.number_marked),
            |w| {
                write_shape(w, &layout.shape)?;
                w.write_u8(layout.canonical as u8)?;
                w.write_u8(layout.track_positions as u8)?;
                w.write_u32::<LE>(layout.skip)?;
                w.write_u32::<LE>(layout.geometry.bucket_bits())?;
                w.write_u32::<LE>(self.ptr_width)?;
                w.write_u32::<LE>(self.posn_width)?;
                w.write_u64::<LE>(self.pointers.len_bits())?;
                w.write_u64::<LE>(self.records.len_bits())?;
                w.write_u64::<LE>(self.counts.distinct)?;
                w.write_u64::<LE>(self.counts.unique)?;
                w.write_u64::<LE>(self.counts.non_unique_entries)?;
                w.write_u64::<LE>(self.counts.max_count)?;
                self.pointers.write_to(w)?;
                self.records.write_to(w)
            },
        )
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = IndexFile::open(path, POSITION_MAGIC)?;
        let r = &mut file.reader;

        let shape = read_shape(r)?;
        let canonical = flag(r.read_u8().map_err(truncated)?, "canonical")?;
        check_canonical_shape(&shape, canonical)?;
        let track_positions = flag(r.read_u8().map_err(truncated)?, "position")?;
        let skip = read_skip(r, &shape)?;
        let geometry = read_geometry(r, &shape)?;
        let ptr_width = read_width(r, "pointer", 1)?;
        let posn_width = read_width(r, "position", 0)?;
        let pointer_bits = r.read_u64::<LE>().map_err(truncated)?;
        let record_bits = r.read_u64::<LE>().map_err(truncated)?;
        let counts = CountSummary {
            total: file.number_of_mers,
            distinct: r.read_u64::<LE>().map_err(truncated)?,
            unique: r.read_u64::<LE>().map_err(truncated)?,
            non_unique_entries: r.read_u64::<LE>().map_err(truncated)?,
            max_count: r.read_u64::<LE>().map_err(truncated)?,
        };

        if track_positions == (posn_width == 0) {
            return Err(IndexError::format(format!(
                "position width {} contradicts the position flag",
                posn_width
            )));
        }
        check_pointer_bits(&geometry, ptr_width, pointer_bits)?;
        file.expect_payload(byte_len(pointer_bits) + byte_len(record_bits))?;

        let pointers = file.stream(pointer_bits)?;
        let records = file.stream(record_bits)?;
        let index = PositionIndex::from_parts(
            IndexLayout {
                shape,
                canonical,
                skip,
                track_positions,
                geometry,
            },
            ptr_width,
            posn_width,
            pointers,
            records,
            file.number_of_mers,
            file.number_marked,
            counts,
        );
        index.verify()?;
        info!(
            "Loaded position index from {} ({} mers, {} distinct)",
            path.display(),
            index.number_of_mers,
            index.counts.distinct
        );
        Ok(index)
    }

    /// Load, then require the stored shape, canonical flag and skip to match
    /// `config`.
    pub fn load_checked<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Self> {
        let index = Self::load(path)?;
        let expected = config.shape()?;
        let mut mismatches = Vec::new();
        if index.layout.shape != expected {
            mismatches.push(format!(
                "shape {:?} (expected {:?})",
                index.layout.shape.describe(),
                expected.describe()
            ));
        }
        if index.layout.canonical != config.canonical {
            mismatches.push(format!("canonical {}", index.layout.canonical));
        }
        if index.layout.skip != config.skip {
            mismatches.push(format!("skip {} (expected {})", index.layout.skip, config.skip));
        }
        if !mismatches.is_empty() {
            return Err(IndexError::format(format!(
                "index parameters differ from the configuration: {}",
                mismatches.join(", ")
            )));
        }
        Ok(index)
    }
}

impl ExistenceIndex {
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(
            "Saving {} existence index ({} mers) to {}",
            if self.is_exact() { "exact" } else { "approximate" },
            self.number_of_mers,
            path.display()
        );
        write_file(
            path,
            EXISTENCE_MAGIC,
            (self.number_of_mers, self.number_marked),
            |w| {
                write_shape(w, &self.shape)?;
                w.write_u8(self.canonical as u8)?;
                w.write_u32::<LE>(self.skip)?;
                match &self.membership {
                    Membership::Exact(set) => {
                        w.write_u8(TAG_EXACT)?;
                        w.write_u32::<LE>(set.geometry.bucket_bits())?;
                        w.write_u32::<LE>(set.ptr_width)?;
                        w.write_u64::<LE>(set.len)?;
                        w.write_u64::<LE>(set.pointers.len_bits())?;
                        w.write_u64::<LE>(set.checks.len_bits())?;
                        set.pointers.write_to(w)?;
                        set.checks.write_to(w)
                    }
                    Membership::Approximate(bloom) => {
                        w.write_u8(TAG_BLOOM)?;
                        w.write_u32::<LE>(bloom.num_hashes())?;
                        w.write_u64::<LE>(bloom.seed())?;
                        w.write_u64::<LE>(bloom.num_bits())?;
                        bloom.to_stream().write_to(w)
                    }
                }
            },
        )
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = IndexFile::open(path, EXISTENCE_MAGIC)?;
        let r = &mut file.reader;

        let shape = read_shape(r)?;
        let canonical = flag(r.read_u8().map_err(truncated)?, "canonical")?;
        check_canonical_shape(&shape, canonical)?;
        let skip = read_skip(r, &shape)?;
        let membership = match r.read_u8().map_err(truncated)? {
            TAG_EXACT => {
                let geometry = read_geometry(r, &shape)?;
                let ptr_width = read_width(r, "pointer", 1)?;
                let len = r.read_u64::<LE>().map_err(truncated)?;
                let pointer_bits = r.read_u64::<LE>().map_err(truncated)?;
                let check_bits = r.read_u64::<LE>().map_err(truncated)?;
                if len != file.number_of_mers {
                    return Err(IndexError::format(format!(
                        "header declares {} mers, set holds {}",
                        file.number_of_mers, len
                    )));
                }
                check_pointer_bits(&geometry, ptr_width, pointer_bits)?;
                file.expect_payload(byte_len(pointer_bits) + byte_len(check_bits))?;
                let set = ExactSet {
                    geometry,
                    ptr_width,
                    pointers: file.stream(pointer_bits)?,
                    checks: file.stream(check_bits)?,
                    len,
                };
                if !set.is_consistent() {
                    return Err(IndexError::format("exact set pointers disagree with its checks"));
                }
                Membership::Exact(set)
            }
            TAG_BLOOM => {
                let num_hashes = r.read_u32::<LE>().map_err(truncated)?;
                let seed = r.read_u64::<LE>().map_err(truncated)?;
                let num_bits = r.read_u64::<LE>().map_err(truncated)?;
                if !(1..=MAX_HASHES).contains(&num_hashes) || num_bits == 0 || num_bits % 64 != 0 {
                    return Err(IndexError::format(format!(
                        "Bloom filter of {} bits with {} hashes",
                        num_bits, num_hashes
                    )));
                }
                file.expect_payload(byte_len(num_bits))?;
                let bits = file.stream(num_bits)?.into_words();
                Membership::Approximate(BloomFilter::from_parts(bits, num_hashes, seed))
            }
            tag => return Err(IndexError::format(format!("unknown membership tag {}", tag))),
        };

        debug!("Loaded existence index from {}", path.display());
        Ok(ExistenceIndex {
            shape,
            canonical,
            skip,
            membership,
            number_of_mers: file.number_of_mers,
            number_marked: file.number_marked,
        })
    }
}
