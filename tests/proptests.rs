use std::collections::HashMap;

use merindex::bits::{low_mask, BitStream};
use merindex::build::BuildOptions;
use merindex::kmer::codec::{canonical, decode, encode, reverse_complement};
use merindex::{BuildPolicy, KmerShape, KmerStream, MemorySource, PositionIndex};
use proptest::prelude::*;

/// Every valid k-mer of `seq` with its start, restarting after non-ACGT.
fn naive_occurrences(seq: &[u8], k: usize, canonical_codes: bool) -> HashMap<u64, Vec<u64>> {
    let mut occ: HashMap<u64, Vec<u64>> = HashMap::new();
    if seq.len() < k {
        return occ;
    }
    for start in 0..=seq.len() - k {
        if let Some(code) = encode(&seq[start..start + k]) {
            let code = if canonical_codes {
                canonical(code, k as u32)
            } else {
                code
            };
            occ.entry(code).or_default().push(start as u64);
        }
    }
    occ
}

proptest! {
    #[test]
    fn prop_fields_round_trip(
        fields in prop::collection::vec((any::<u64>(), 1u32..=64), 1..64)
    ) {
        let mut bs = BitStream::new();
        for &(v, w) in &fields {
            bs.put_bits(v, w);
        }
        bs.rewind();
        for &(v, w) in &fields {
            prop_assert_eq!(bs.get_bits(w), Some(v & low_mask(w)));
        }
        prop_assert_eq!(bs.get_bits(1), None);
    }

    #[test]
    fn prop_numbers_round_trip(values in prop::collection::vec(any::<u64>(), 1..32)) {
        let mut bs = BitStream::new();
        for &v in &values {
            bs.put_number(v);
        }
        let mut r = bs.reader();
        for &v in &values {
            prop_assert_eq!(r.get_number(), Some(v));
        }
        prop_assert_eq!(r.get_number(), None);
    }

    #[test]
    fn prop_reverse_complement_is_involution(k in 1u32..=32, raw in any::<u64>()) {
        let code = raw & low_mask(2 * k);
        prop_assert_eq!(reverse_complement(reverse_complement(code, k), k), code);
        let c = canonical(code, k);
        prop_assert_eq!(canonical(c, k), c);
        prop_assert!(c <= code);
    }

    #[test]
    fn prop_decode_inverts_encode(
        seq in prop::collection::vec(prop::sample::select(b"ACGT".to_vec()), 1..=32)
    ) {
        let code = encode(&seq).unwrap();
        let decoded = decode(code, seq.len() as u32);
        prop_assert_eq!(decoded.as_bytes(), &seq[..]);
    }

    #[test]
    fn prop_position_completeness(
        k in 1usize..=10,
        canonical_codes in any::<bool>(),
        seq in prop::collection::vec(prop::sample::select(b"ACGTN".to_vec()), 0..200)
    ) {
        let expected = naive_occurrences(&seq, k, canonical_codes);
        let stream = KmerStream::new(
            MemorySource::from_sequences([&seq]),
            KmerShape::contiguous(k as u32).unwrap(),
        );
        let options = BuildOptions {
            canonical: canonical_codes,
            ..BuildOptions::default()
        };
        let index = PositionIndex::build(&stream, &options, &BuildPolicy::Unrestricted).unwrap();

        let total: usize = expected.values().map(Vec::len).sum();
        prop_assert_eq!(index.number_of_mers(), total as u64);
        prop_assert_eq!(index.number_distinct(), expected.len() as u64);
        for (code, positions) in &expected {
            let found = index.lookup(*code);
            prop_assert_eq!(found.as_ref(), Some(positions));
        }
    }

    #[test]
    fn prop_ranges_partition_the_stream(
        seq in prop::collection::vec(prop::sample::select(b"ACGTN".to_vec()), 0..120),
        cut in 0u64..130,
        skip in 0u32..3,
        max_run in prop::option::of(1u32..4),
    ) {
        let mut shape = KmerShape::contiguous(4).unwrap();
        if let Some(r) = max_run {
            shape = shape.with_compression(r).unwrap();
        }
        let make = || {
            KmerStream::new(MemorySource::from_sequences([&seq, &seq]), shape.clone())
                .with_skip(skip)
                .unwrap()
        };
        let full: Vec<_> = make().collect();
        let mut head = make();
        head.set_range(0, cut).unwrap();
        let mut tail = make();
        tail.set_range(cut, u64::MAX).unwrap();
        let joined: Vec<_> = head.chain(tail).collect();
        prop_assert_eq!(joined, full);
    }
}
