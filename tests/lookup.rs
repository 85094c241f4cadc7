use std::collections::{BTreeSet, HashSet};

use merindex::build::BuildOptions;
use merindex::index::MismatchEnumerator;
use merindex::kmer::codec::{base_distance, encode, reverse_complement};
use merindex::{
    BuildPolicy, IndexError, ConcurrentBuilder, ExistenceIndex, ExistenceKind, KmerShape, KmerStream,
    MemorySource, PositionIndex,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_dna(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

fn contiguous_stream(seqs: &[Vec<u8>], k: u32) -> KmerStream<MemorySource> {
    KmerStream::new(
        MemorySource::from_sequences(seqs.iter()),
        KmerShape::contiguous(k).unwrap(),
    )
}

#[test]
fn test_example_records() {
    let stream = KmerStream::new(
        MemorySource::from_sequences(["ACGTACGTNN", "ACGTACGA"]),
        KmerShape::contiguous(4).unwrap(),
    );
    let mers: Vec<_> = stream.collect();
    let offsets: Vec<(u32, u64)> = mers.iter().map(|m| (m.seq_id, m.seq_offset)).collect();
    assert_eq!(
        offsets,
        vec![(0, 0), (0, 1), (0, 2), (0, 3), (0, 4), (1, 0), (1, 1), (1, 2), (1, 3), (1, 4)]
    );
    assert_eq!(mers[5].position, 10);
}

#[test]
fn test_exact_existence_has_no_false_positives() {
    let mut rng = StdRng::seed_from_u64(17);
    let seqs: Vec<Vec<u8>> = (0..20).map(|_| random_dna(&mut rng, 300)).collect();
    let k = 11;
    let index = ConcurrentBuilder::new(4)
        .unwrap()
        .with_segment_bases(257)
        .unwrap()
        .build_existence(&contiguous_stream(&seqs, k), true, ExistenceKind::Exact)
        .unwrap();

    let mut reference = HashSet::new();
    for s in &seqs {
        for w in s.windows(k as usize) {
            let code = encode(w).unwrap();
            reference.insert(code.min(reverse_complement(code, k)));
        }
    }
    assert_eq!(index.len(), reference.len() as u64);
    for &code in &reference {
        assert!(index.exists(code));
        assert!(index.exists(reverse_complement(code, k)));
    }
    for _ in 0..20_000 {
        let code = rng.gen_range(0..1u64 << (2 * k));
        let canonical = code.min(reverse_complement(code, k));
        assert_eq!(index.exists_exact(code), Some(reference.contains(&canonical)));
    }
}

#[test]
fn test_approximate_existence_is_sound() {
    let mut rng = StdRng::seed_from_u64(3);
    let seqs: Vec<Vec<u8>> = (0..10).map(|_| random_dna(&mut rng, 500)).collect();
    let stream = contiguous_stream(&seqs, 15);
    let index =
        ExistenceIndex::build(&stream, true, ExistenceKind::Approximate { fp_rate: 0.01 }).unwrap();
    assert!(!index.is_exact());
    for m in stream.clone() {
        assert!(index.contains_mer(&m));
        assert!(index.exists(m.forward));
    }

    let false_hits = (0..10_000)
        .filter(|_| index.exists(rng.gen_range(0..1u64 << 30)))
        .count();
    assert!(false_hits < 500, "{} false positives", false_hits);
}

/// Positions of every indexed k-mer within `e` of `query` on either strand.
fn brute_force_mismatch(seqs: &[Vec<u8>], k: usize, query: u64, e: u32, canonical: bool) -> Vec<u64> {
    let mut hits = Vec::new();
    let mut offset = 0u64;
    for s in seqs {
        for (i, w) in s.windows(k).enumerate() {
            let code = encode(w).unwrap();
            let mut d = base_distance(code, query);
            if canonical {
                d = d.min(base_distance(reverse_complement(code, k as u32), query));
            }
            if d <= e {
                hits.push(offset + i as u64);
            }
        }
        offset += s.len() as u64;
    }
    hits.sort_unstable();
    hits
}

#[test]
fn test_mismatch_lookup_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(99);
    let k = 8usize;
    let seqs: Vec<Vec<u8>> = (0..4).map(|_| random_dna(&mut rng, 400)).collect();
    for canonical in [true, false] {
        let options = BuildOptions {
            canonical,
            bucket_bits: Some(9),
            ..BuildOptions::default()
        };
        let index = PositionIndex::build(
            &contiguous_stream(&seqs, k as u32),
            &options,
            &BuildPolicy::Unrestricted,
        )
        .unwrap();
        for _ in 0..25 {
            let query = encode(&random_dna(&mut rng, k)).unwrap();
            for e in 1..=3 {
                let got = index.get_mismatch(query, e).unwrap();
                let expected = brute_force_mismatch(&seqs, k, query, e, canonical);
                assert_eq!(got, expected, "query {:x}, e {}, canonical {}", query, e, canonical);
            }
        }
    }
}

#[test]
fn test_enumerator_is_duplicate_free() {
    for weight in 1..=7u32 {
        for e in 1..=3u32 {
            let en = MismatchEnumerator::new(weight, e).unwrap();
            let neighbours: Vec<u64> = en.neighbours(0b01).collect();
            let distinct: BTreeSet<u64> = neighbours.iter().copied().collect();
            assert_eq!(distinct.len(), neighbours.len());
            let expected: usize = (0..=e.min(weight))
                .map(|j| binomial(weight, j) * 3usize.pow(j))
                .sum();
            assert_eq!(neighbours.len(), expected);
        }
    }
}

fn binomial(n: u32, k: u32) -> usize {
    (0..k).fold(1usize, |acc, i| acc * (n - i) as usize / (i + 1) as usize)
}

#[test]
fn test_spaced_seed_index() {
    let shape = KmerShape::spaced("110111011").unwrap();
    let seqs = ["ACGTTAGCATTAGCAGGATCC", "TTAGCATTAGC"];
    let stream = KmerStream::new(MemorySource::from_sequences(seqs), shape.clone());
    let index = PositionIndex::build(&stream, &BuildOptions::default(), &BuildPolicy::Unrestricted).unwrap();

    // TTAGCATTA occurs at 3 and at 21, the start of the second record.
    assert_eq!(index.lookup_str("TTAGCATTA").unwrap(), Some(vec![3, 21]));
    // Bases under template zeros do not matter.
    assert_eq!(index.lookup_str("TTCGCAGTA").unwrap(), Some(vec![3, 21]));
    assert_eq!(index.number_of_mers(), 13 + 3);
    assert!(index.get_mismatch(0, 1).is_ok());
}

#[test]
fn test_asymmetric_seed_needs_forward_indexing() {
    let shape = KmerShape::spaced("1101").unwrap();
    let stream = KmerStream::new(MemorySource::from_sequences(["ACGTACGTTTGCA"]), shape);

    assert!(matches!(
        PositionIndex::build(&stream, &BuildOptions::default(), &BuildPolicy::Unrestricted),
        Err(IndexError::Range(_))
    ));
    assert!(matches!(
        ExistenceIndex::build(&stream, true, ExistenceKind::Exact),
        Err(IndexError::Range(_))
    ));

    let options = BuildOptions {
        canonical: false,
        ..BuildOptions::default()
    };
    let index = PositionIndex::build(&stream, &options, &BuildPolicy::Unrestricted).unwrap();
    let exist = ExistenceIndex::build(&stream, false, ExistenceKind::Exact).unwrap();
    let mers: Vec<_> = stream.clone().collect();
    assert_eq!(mers.len(), 10);
    for m in &mers {
        assert!(exist.exists(m.forward));
        assert!(index.lookup(m.forward).unwrap().contains(&m.position));
    }
    assert!(index.lookup_str("ACGT").unwrap().is_some());
    assert!(index.get_mismatch(mers[0].forward, 1).is_ok());
}

#[test]
fn test_merge_of_halves() {
    let mut rng = StdRng::seed_from_u64(5);
    let a_seqs: Vec<Vec<u8>> = (0..3).map(|_| random_dna(&mut rng, 120)).collect();
    let b_seqs: Vec<Vec<u8>> = (0..2).map(|_| random_dna(&mut rng, 90)).collect();
    let options = BuildOptions {
        bucket_bits: Some(7),
        ..BuildOptions::default()
    };
    let build = |seqs: &[Vec<u8>]| {
        PositionIndex::build(&contiguous_stream(seqs, 6), &options, &BuildPolicy::Unrestricted).unwrap()
    };
    let a = build(&a_seqs);
    let b = build(&b_seqs);
    let all: Vec<Vec<u8>> = a_seqs.iter().chain(&b_seqs).cloned().collect();
    let merged = PositionIndex::merge(&a, &b, 360).unwrap();
    assert_eq!(merged, build(&all));
}

#[test]
fn test_covered_bases_mask() {
    let filter = ExistenceIndex::build(
        &KmerStream::new(
            MemorySource::from_sequences(["GATTACA"]),
            KmerShape::contiguous(5).unwrap(),
        ),
        true,
        ExistenceKind::Exact,
    )
    .unwrap();
    let covered = filter.covered_bases(b"CCGATTACCCTGTAATCC");
    let marks: String = covered.iter().map(|&c| if c { '#' } else { '.' }).collect();
    // GATTA and ATTAC forward from 2, reverse-strand hits from 10.
    assert_eq!(marks, "..######..#######.");
}
