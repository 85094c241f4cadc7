use std::fs;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use merindex::build::BuildOptions;
use merindex::index::{file_kind, FileKind, POSITION_MAGIC};
use merindex::{
    load_sequences, BuildPolicy, ConcurrentBuilder, ExistenceIndex, ExistenceKind, IndexConfig,
    IndexError, KmerShape, KmerStream, MemorySource, PositionIndex,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn random_records(seed: u64, n: usize, len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            (0..len)
                .map(|_| b"ACGTACGTACGTACGTN"[rng.gen_range(0..17)])
                .collect()
        })
        .collect()
}

#[test]
fn test_thread_count_gives_identical_files() {
    let dir = TempDir::new().unwrap();
    let records = random_records(11, 40, 250);
    let shape = KmerShape::contiguous(12).unwrap().with_compression(3).unwrap();
    let stream = KmerStream::new(MemorySource::from_sequences(records.iter()), shape)
        .with_skip(1)
        .unwrap();
    let options = BuildOptions::default();

    let mut files = Vec::new();
    for threads in [1, 2, 4, 8] {
        let index = ConcurrentBuilder::new(threads)
            .unwrap()
            .with_segment_bases(613)
            .unwrap()
            .build_position(&stream, &options, &BuildPolicy::Unrestricted)
            .unwrap();
        let path = dir.path().join(format!("t{}.pos", threads));
        index.save_state(&path).unwrap();
        files.push(fs::read(&path).unwrap());

        let exist = ConcurrentBuilder::new(threads)
            .unwrap()
            .with_segment_bases(613)
            .unwrap()
            .build_existence(&stream, true, ExistenceKind::Exact)
            .unwrap();
        let path = dir.path().join(format!("t{}.exist", threads));
        exist.save_state(&path).unwrap();
        files.push(fs::read(&path).unwrap());
    }
    for pair in files.chunks(2).skip(1) {
        assert_eq!(pair[0], files[0]);
        assert_eq!(pair[1], files[1]);
    }
}

#[test]
fn test_fasta_to_checked_load() {
    let dir = TempDir::new().unwrap();
    let fasta = dir.path().join("reads.fa.gz");
    let mut gz = GzEncoder::new(fs::File::create(&fasta).unwrap(), Compression::default());
    writeln!(gz, ">r1 first\nACGTACGTNN\n>r2\nACGT\nACGA").unwrap();
    gz.finish().unwrap();

    let config = IndexConfig {
        k: 4,
        bucket_bits: Some(3),
        ..IndexConfig::default()
    };
    let source = load_sequences(&[&fasta]).unwrap();
    assert_eq!(source.name(1), Some("r2"));
    let stream = KmerStream::new(source, config.shape().unwrap());
    let index = PositionIndex::build(&stream, &config.build_options(), &BuildPolicy::Unrestricted).unwrap();

    let path = dir.path().join("reads.pos");
    index.save_state(&path).unwrap();
    assert_eq!(file_kind(&path).unwrap(), FileKind::Position);
    let loaded = PositionIndex::load_checked(&path, &config).unwrap();
    assert_eq!(loaded.lookup_str("ACGT").unwrap(), Some(vec![0, 4, 10]));
    assert_eq!(loaded.stats().number_of_mers, 10);

    let forward = IndexConfig {
        canonical: false,
        ..config
    };
    assert!(matches!(
        PositionIndex::load_checked(&path, &forward),
        Err(IndexError::Format(_))
    ));
}

#[test]
fn test_unfinished_and_foreign_files() {
    let dir = TempDir::new().unwrap();
    let stream = KmerStream::new(
        MemorySource::from_sequences(["GATTACAGATTACA"]),
        KmerShape::contiguous(5).unwrap(),
    );
    let exist = ExistenceIndex::build(&stream, true, ExistenceKind::Exact).unwrap();
    let path = dir.path().join("g.exist");
    exist.save_state(&path).unwrap();
    assert_eq!(ExistenceIndex::load(&path).unwrap(), exist);

    let mut bytes = fs::read(&path).unwrap();
    bytes[15] = b'?';
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(ExistenceIndex::load(&path), Err(IndexError::Format(_))));

    bytes[..16].copy_from_slice(POSITION_MAGIC);
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(ExistenceIndex::load(&path), Err(IndexError::Format(_))));

    fs::write(&path, b"merindex").unwrap();
    assert!(matches!(ExistenceIndex::load(&path), Err(IndexError::Format(_))));
    assert!(matches!(
        ExistenceIndex::load(dir.path().join("missing")),
        Err(IndexError::Io(_))
    ));
}

#[test]
fn test_counts_only_index_round_trip() {
    let dir = TempDir::new().unwrap();
    let records = random_records(2, 10, 80);
    let stream = KmerStream::new(
        MemorySource::from_sequences(records.iter()),
        KmerShape::contiguous(7).unwrap(),
    );
    let options = BuildOptions {
        track_positions: false,
        ..BuildOptions::default()
    };
    let policy = BuildPolicy::from_options(None, None, Some(2), None).unwrap();
    let index = PositionIndex::build(&stream, &options, &policy).unwrap();
    let path = dir.path().join("counts.pos");
    index.save_state(&path).unwrap();
    let loaded = PositionIndex::load(&path).unwrap();
    assert_eq!(loaded, index);
    assert!(loaded.records().all(|r| r.count >= 2 && r.positions.is_empty()));
    assert_eq!(loaded.number_marked(), index.number_marked());
}
