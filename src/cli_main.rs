use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use merindex::index::{file_kind, FileKind, Membership};
use merindex::kmer::codec::decode;
use merindex::{
    load_sequences, BuildPolicy, ConcurrentBuilder, ExistenceIndex, IndexConfig, IndexError,
    KmerStream, PositionIndex, Result,
};

#[derive(Parser, Debug)]
#[command(name = "merindex", version, about = "Bit-packed k-mer existence and position indexes", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the build commands; they override `--config`.
#[derive(Args, Debug)]
pub struct ShapeArgs {
    /// JSON index configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Mer size
    #[arg(short, long = "mer-size")]
    pub k: Option<u32>,

    /// Spaced seed template of 1/0/x, e.g. 1101011
    #[arg(long)]
    pub template: Option<String>,

    /// Cap homopolymer runs at this many bases
    #[arg(long)]
    pub compress: Option<u32>,

    /// Emit one mer, then skip this many
    #[arg(long)]
    pub skip: Option<u32>,

    /// Index forward codes instead of canonical ones
    #[arg(long)]
    pub forward_only: bool,

    /// Number of threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Target bases per build segment
    #[arg(long)]
    pub segment_bases: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and save an existence index
    Exist {
        /// Input FASTA/FASTQ(.gz) files
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,

        /// Store a Bloom filter with this false-positive rate
        #[arg(long)]
        fp_rate: Option<f64>,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Build and save a position index
    Build {
        /// Input FASTA/FASTQ(.gz) files
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,

        /// Bucket selector bits; sized automatically when omitted
        #[arg(long)]
        bucket_bits: Option<u32>,

        /// Memory cap in MB for automatic sizing
        #[arg(long)]
        max_memory_mb: Option<u64>,

        /// Keep counts only
        #[arg(long)]
        no_positions: bool,

        /// Index only mers present in this existence index
        #[arg(long)]
        include: Option<PathBuf>,

        /// Index only mers absent from this existence index
        #[arg(long)]
        exclude: Option<PathBuf>,

        /// Keep mers seen at least this often
        #[arg(long)]
        min_count: Option<u64>,

        /// Keep mers seen at most this often
        #[arg(long)]
        max_count: Option<u64>,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Query k-mers against a saved index
    Lookup {
        /// Index file
        #[arg(short, long)]
        index: PathBuf,

        /// Allow up to this many substituted bases (1-3)
        #[arg(short, long)]
        mismatches: Option<u32>,

        /// K-mers to look up
        #[arg(required = true)]
        kmers: Vec<String>,
    },

    /// Print index statistics as JSON
    Stats {
        /// Index file
        index: PathBuf,
    },

    /// Print every stored record
    Dump {
        /// Index file
        index: PathBuf,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn resolve_config(args: &ShapeArgs) -> Result<IndexConfig> {
    let mut config = match &args.config {
        Some(path) => IndexConfig::from_json_path(path)?,
        None => IndexConfig::default(),
    };
    if let Some(k) = args.k {
        config.k = k;
    }
    if args.template.is_some() {
        config.template = args.template.clone();
    }
    if args.compress.is_some() {
        config.compression = args.compress;
    }
    if let Some(skip) = args.skip {
        config.skip = skip;
    }
    if args.forward_only {
        config.canonical = false;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(bases) = args.segment_bases {
        config.segment_bases = bases;
    }
    Ok(config)
}

fn builder_for(config: &IndexConfig) -> Result<ConcurrentBuilder> {
    ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
        .ok();
    ConcurrentBuilder::new(config.threads)?.with_segment_bases(config.segment_bases)
}

fn open_stream(inputs: &[PathBuf], config: &IndexConfig) -> Result<KmerStream<merindex::MemorySource>> {
    let source = load_sequences(inputs)?;
    KmerStream::new(source, config.shape()?).with_skip(config.skip)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Exist {
            input,
            output,
            fp_rate,
            shape,
        } => {
            let mut config = resolve_config(&shape)?;
            if fp_rate.is_some() {
                config.exist_fp_rate = fp_rate;
            }
            let kind = config.existence_kind()?;
            let stream = open_stream(&input, &config)?;
            let index = builder_for(&config)?.build_existence(&stream, config.canonical, kind)?;
            index.save_state(&output)?;
        }

        Commands::Build {
            input,
            output,
            bucket_bits,
            max_memory_mb,
            no_positions,
            include,
            exclude,
            min_count,
            max_count,
            shape,
        } => {
            let mut config = resolve_config(&shape)?;
            if bucket_bits.is_some() {
                config.bucket_bits = bucket_bits;
            }
            if max_memory_mb.is_some() {
                config.max_memory_mb = max_memory_mb;
            }
            if no_positions {
                config.track_positions = false;
            }

            // Conflicting policies are rejected before any input is read.
            if [include.is_some(), exclude.is_some(), min_count.is_some() || max_count.is_some()]
                .iter()
                .filter(|&&requested| requested)
                .count()
                > 1
            {
                return Err(IndexError::PolicyConflict(
                    "choose one of --include, --exclude, --min-count/--max-count".to_string(),
                ));
            }
            let include = include.map(ExistenceIndex::load).transpose()?;
            let exclude = exclude.map(ExistenceIndex::load).transpose()?;
            let policy =
                BuildPolicy::from_options(include.as_ref(), exclude.as_ref(), min_count, max_count)?;

            let stream = open_stream(&input, &config)?;
            let index =
                builder_for(&config)?.build_position(&stream, &config.build_options(), &policy)?;
            index.save_state(&output)?;
        }

        Commands::Lookup {
            index,
            mismatches,
            kmers,
        } => lookup(&index, mismatches, &kmers)?,

        Commands::Stats { index } => {
            let stats = match file_kind(&index)? {
                FileKind::Position => PositionIndex::load(&index)?.stats(),
                FileKind::Existence => ExistenceIndex::load(&index)?.stats(),
            };
            println!("{}", stats.to_json().map_err(io::Error::from)?);
        }

        Commands::Dump { index, limit } => dump(&index, limit.unwrap_or(usize::MAX))?,
    }
    Ok(())
}

fn lookup(path: &Path, mismatches: Option<u32>, kmers: &[String]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match file_kind(path)? {
        FileKind::Position => {
            let index = PositionIndex::load(path)?;
            for kmer in kmers {
                let positions = match mismatches {
                    Some(e) => {
                        let (forward, _) = index.shape().encode_str(kmer)?;
                        Some(index.get_mismatch(forward, e)?)
                    }
                    None => index.lookup_str(kmer)?,
                };
                match positions {
                    Some(p) => {
                        let list: Vec<String> = p.iter().map(u64::to_string).collect();
                        writeln!(out, "{}\t{}\t{}", kmer, p.len(), list.join(","))?;
                    }
                    None => writeln!(out, "{}\t0\t", kmer)?,
                }
            }
        }
        FileKind::Existence => {
            if mismatches.is_some() {
                warn!("Existence indexes answer exact queries only; ignoring --mismatches");
            }
            let index = ExistenceIndex::load(path)?;
            for kmer in kmers {
                let (forward, reverse) = index.shape().encode_str(kmer)?;
                let code = if index.is_canonical() {
                    forward.min(reverse)
                } else {
                    forward
                };
                let found = match index.membership() {
                    Membership::Exact(set) => set.contains(code),
                    Membership::Approximate(bloom) => bloom.may_contain(code),
                };
                writeln!(out, "{}\t{}", kmer, if found { "present" } else { "absent" })?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn dump(path: &Path, limit: usize) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match file_kind(path)? {
        FileKind::Position => {
            let index = PositionIndex::load(path)?;
            let weight = index.shape().weight();
            for record in index.records().take(limit) {
                let list: Vec<String> = record.positions.iter().map(u64::to_string).collect();
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    decode(record.code, weight),
                    record.count,
                    list.join(",")
                )?;
            }
        }
        FileKind::Existence => {
            let index = ExistenceIndex::load(path)?;
            let weight = index.shape().weight();
            match index.membership() {
                Membership::Exact(set) => {
                    for code in set.codes().take(limit) {
                        writeln!(out, "{}", decode(code, weight))?;
                    }
                }
                Membership::Approximate(_) => {
                    info!("{} is a Bloom filter; its mers cannot be listed", path.display());
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}
