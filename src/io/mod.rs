//! Sequence input: the source abstraction the k-mer stream reads from and
//! the FASTA/FASTQ loader that fills it.

pub mod fasta;
pub mod source;

pub use fasta::load_sequences;
pub use source::{MemorySource, SequenceSource, Symbol};
