//! Index persistence: byte layout, round-trips, and membership parity.

use kebab::index::bloom::ShiftFilter;
use kebab::index::{FilterSizeMode, IndexParams, KebabIndex, KmerMode};

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

#[test]
fn megabit_filter_membership_parity() {
    // 100k planned elements with 7 explicit hashes round up to a 2^20-bit
    // filter.
    let filter = ShiftFilter::new(100_000, 0.01, 7, FilterSizeMode::NextPowerOfTwo).unwrap();
    assert_eq!(filter.num_bits(), 1 << 20);
    assert_eq!(filter.num_hashes(), 7);

    let mut state = 0x5eed;
    let keys: Vec<u64> = (0..2000).map(|_| splitmix64(&mut state)).collect();
    for &k in &keys {
        filter.add(k);
    }
    assert!(filter.num_set_bits() > 12_000);

    let mut buf = Vec::new();
    filter.save(&mut buf).unwrap();
    let reloaded = ShiftFilter::load(&mut &buf[..]).unwrap();

    assert_eq!(reloaded.num_bits(), filter.num_bits());
    assert_eq!(reloaded.num_set_bits(), filter.num_set_bits());
    assert_eq!(reloaded.num_hashes(), filter.num_hashes());

    // Inserted keys plus 10,000 fresh probe keys answer identically.
    for &k in &keys {
        assert!(reloaded.contains(k));
    }
    for _ in 0..10_000 {
        let probe = splitmix64(&mut state);
        assert_eq!(reloaded.contains(probe), filter.contains(probe));
    }
}

#[test]
fn index_file_byte_layout() {
    let index = KebabIndex::new(&IndexParams {
        k: 20,
        expected_kmers: 64,
        fp_rate: 0.01,
        num_hashes: 0,
        kmer_mode: KmerMode::Canonical,
        size_mode: FilterSizeMode::NextPowerOfTwo,
    })
    .unwrap();

    let mut buf = Vec::new();
    index.save(&mut buf).unwrap();

    // Option header and index body, little-endian at fixed offsets.
    assert_eq!(&buf[0..4], &1u32.to_le_bytes()); // NextPowerOfTwo
    assert_eq!(&buf[4..12], &20u64.to_le_bytes()); // k
    assert_eq!(&buf[12..16], &1u32.to_le_bytes()); // Canonical
    let m = u64::from_le_bytes(buf[16..24].try_into().unwrap());
    assert_eq!(m, 1024);
    let set_bits = u64::from_le_bytes(buf[24..32].try_into().unwrap());
    assert_eq!(set_bits, 0);

    // Words follow, then the hash count closes the record.
    let words_len = (m as usize).div_ceil(64) * 8;
    assert_eq!(buf.len(), 32 + words_len + 8);
    let k_hashes = u64::from_le_bytes(buf[buf.len() - 8..].try_into().unwrap());
    assert_eq!(k_hashes, 7);
}

#[test]
fn index_roundtrip_preserves_scan_results() {
    let mut state = 0x1234;
    let genome: Vec<u8> = (0..3000)
        .map(|_| b"ACGT"[(splitmix64(&mut state) % 4) as usize])
        .collect();

    for (kmer_mode, size_mode) in [
        (KmerMode::Both, FilterSizeMode::NextPowerOfTwo),
        (KmerMode::Canonical, FilterSizeMode::PreviousPowerOfTwo),
        (KmerMode::Forward, FilterSizeMode::Exact),
    ] {
        let index = KebabIndex::new(&IndexParams {
            k: 12,
            expected_kmers: 6000,
            fp_rate: 0.01,
            num_hashes: 0,
            kmer_mode,
            size_mode,
        })
        .unwrap();
        index.add_sequence(&genome);

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        let loaded = KebabIndex::load(&mut &buf[..]).unwrap();

        assert_eq!(loaded.k(), index.k());
        assert_eq!(loaded.kmer_mode(), kmer_mode);
        assert_eq!(loaded.size_mode(), size_mode);

        for start in (0..2000).step_by(379) {
            let read = &genome[start..start + 500];
            assert_eq!(
                index.scan_read(read, 15, false, false).unwrap(),
                loaded.scan_read(read, 15, false, false).unwrap(),
            );
        }
    }
}

#[test]
fn stale_size_mode_header_is_rejected() {
    // An index saved with a rounded mode but whose filter size is not a
    // power of two cannot have been written by this tool; loading must fail
    // rather than probe with the wrong reducer.
    let index = KebabIndex::new(&IndexParams {
        k: 8,
        expected_kmers: 64,
        fp_rate: 0.01,
        num_hashes: 0,
        kmer_mode: KmerMode::Forward,
        size_mode: FilterSizeMode::Exact,
    })
    .unwrap();
    let mut buf = Vec::new();
    index.save(&mut buf).unwrap();

    // Flip the header from Exact to NextPowerOfTwo; m stays 613.
    buf[0..4].copy_from_slice(&1u32.to_le_bytes());
    assert!(KebabIndex::load(&mut &buf[..]).is_err());
}
