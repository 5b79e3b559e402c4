//! End-to-end fragmentation scenarios.
//!
//! Small hand-checkable references and reads, exercised through the public
//! index API exactly as the scan pipeline drives it.

use kebab::index::fragment::merge_overlapping;
use kebab::index::{FilterSizeMode, Fragment, IndexParams, KebabIndex, KmerMode};

fn small_index(kmer_mode: KmerMode) -> IndexParams {
    IndexParams {
        k: 4,
        expected_kmers: 64,
        fp_rate: 0.01,
        num_hashes: 0,
        kmer_mode,
        size_mode: FilterSizeMode::NextPowerOfTwo,
    }
}

fn frag(start: usize, length: usize) -> Fragment {
    Fragment { start, length }
}

#[test]
fn scenario_full_read_covered() {
    let index = KebabIndex::new(&small_index(KmerMode::Forward)).unwrap();
    index.add_sequence(b"ACGTACGT");
    let frags = index.scan_read(b"ACGTACGT", 4, false, false).unwrap();
    assert_eq!(frags, vec![frag(0, 8)]);
}

#[test]
fn scenario_non_acgt_breaks_read() {
    let index = KebabIndex::new(&small_index(KmerMode::Forward)).unwrap();
    index.add_sequence(b"ACGTACGT");
    let frags = index.scan_read(b"ACGTXXXT", 4, false, false).unwrap();
    assert_eq!(frags, vec![frag(0, 4)]);
}

#[test]
fn scenario_known_prefix_unknown_suffix() {
    let index = KebabIndex::new(&small_index(KmerMode::Forward)).unwrap();
    for _ in 0..10 {
        index.add_sequence(b"AAAA");
    }
    let frags = index.scan_read(b"AAAACCCC", 4, false, false).unwrap();
    assert_eq!(frags, vec![frag(0, 4)]);
}

#[test]
fn scenario_canonical_palindrome() {
    // ACGT is its own reverse complement, so both orientations of the read
    // probe the same canonical hash.
    let index = KebabIndex::new(&small_index(KmerMode::Canonical)).unwrap();
    index.add_sequence(b"ACGT");
    let frags = index.scan_read(b"ACGT", 4, false, false).unwrap();
    assert_eq!(frags, vec![frag(0, 4)]);
}

#[test]
fn scenario_overlap_merging() {
    let mut overlapping = vec![frag(0, 10), frag(8, 10)];
    merge_overlapping(&mut overlapping);
    assert_eq!(overlapping, vec![frag(0, 18)]);

    let mut disjoint = vec![frag(0, 10), frag(12, 10)];
    merge_overlapping(&mut disjoint);
    assert_eq!(disjoint, vec![frag(0, 10), frag(12, 10)]);
}

// ---------------------------------------------------------------------------
// Randomised reads: invariants and prefetch parity
// ---------------------------------------------------------------------------

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn random_genome(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| b"ACGT"[(splitmix64(&mut state) % 4) as usize])
        .collect()
}

/// A genome slice with a few point corruptions, so scans produce several
/// fragments per read.
fn corrupted_read(genome: &[u8], start: usize, len: usize, seed: u64) -> Vec<u8> {
    let mut read = genome[start..start + len].to_vec();
    let mut state = seed;
    for _ in 0..3 {
        let pos = (splitmix64(&mut state) as usize) % len;
        read[pos] = b'N';
    }
    read
}

#[test]
fn random_reads_fragment_invariants() {
    let genome = random_genome(4000, 0xbeef);
    let index = KebabIndex::new(&IndexParams {
        k: 8,
        expected_kmers: 4000,
        fp_rate: 0.01,
        num_hashes: 0,
        kmer_mode: KmerMode::Both,
        size_mode: FilterSizeMode::NextPowerOfTwo,
    })
    .unwrap();
    index.add_sequence(&genome);

    let min_mem_length = 12;
    for r in 0..20 {
        let read = corrupted_read(&genome, r * 150, 150, r as u64 + 1);
        for remove_overlaps in [false, true] {
            let frags = index
                .scan_read(&read, min_mem_length, remove_overlaps, false)
                .unwrap();
            let mut prev_start = 0usize;
            let mut prev_end = 0usize;
            for f in &frags {
                assert!(f.length >= min_mem_length);
                assert!(f.start + f.length <= read.len());
                assert!(f.start >= prev_start, "fragments out of scan order");
                if remove_overlaps {
                    assert!(f.start >= prev_end, "merged fragments overlap");
                }
                prev_start = f.start;
                prev_end = f.end();
            }
        }
    }
}

#[test]
fn random_reads_prefetch_parity() {
    let genome = random_genome(4000, 0xcafe);
    for kmer_mode in [KmerMode::Forward, KmerMode::Both, KmerMode::Canonical] {
        let index = KebabIndex::new(&IndexParams {
            k: 8,
            expected_kmers: 8000,
            fp_rate: 0.01,
            num_hashes: 0,
            kmer_mode,
            size_mode: FilterSizeMode::NextPowerOfTwo,
        })
        .unwrap();
        index.add_sequence(&genome);

        for r in 0..20 {
            let read = corrupted_read(&genome, r * 100, 200, r as u64 + 77);
            let plain = index.scan_read(&read, 12, false, false).unwrap();
            let prefetched = index.scan_read(&read, 12, false, true).unwrap();
            assert_eq!(plain, prefetched, "mode {kmer_mode}");
        }
    }
}

#[test]
fn merge_twice_is_noop_on_scan_output() {
    let genome = random_genome(2000, 0xfeed);
    let index = KebabIndex::new(&IndexParams {
        k: 6,
        expected_kmers: 2000,
        fp_rate: 0.01,
        num_hashes: 0,
        kmer_mode: KmerMode::Forward,
        size_mode: FilterSizeMode::NextPowerOfTwo,
    })
    .unwrap();
    index.add_sequence(&genome);

    let read = corrupted_read(&genome, 250, 400, 9);
    let mut frags = index.scan_read(&read, 10, true, false).unwrap();
    let merged_once = frags.clone();
    merge_overlapping(&mut frags);
    assert_eq!(frags, merged_once);
}

#[test]
fn exact_size_mode_scans_identically() {
    // Same reference indexed with the modulo and shift reducers; both must
    // cover every true k-mer (membership never has false negatives).
    let genome = random_genome(1000, 0xabcd);
    for size_mode in [FilterSizeMode::Exact, FilterSizeMode::PreviousPowerOfTwo] {
        let index = KebabIndex::new(&IndexParams {
            k: 8,
            expected_kmers: 1000,
            fp_rate: 0.01,
            num_hashes: 0,
            kmer_mode: KmerMode::Forward,
            size_mode,
        })
        .unwrap();
        index.add_sequence(&genome);
        let frags = index.scan_read(&genome, 20, false, false).unwrap();
        assert_eq!(
            frags,
            vec![Fragment {
                start: 0,
                length: genome.len()
            }],
        );
    }
}
