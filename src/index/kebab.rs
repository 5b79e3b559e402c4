//! The KeBaB index: one Bloom filter plus the rolling-hash configuration,
//! with the build (`add_sequence`) and scan (`scan_read`) operations and the
//! `.kbb` persistent format.
//!
//! The filter's reducer is fixed by the filter-size mode: an exact size uses
//! the modulo reducer, a rounded (power-of-two) size uses the shift reducer.
//! Dispatch happens once per call; the window loops are monomorphic.

use std::io::{Read, Write};
use std::str::FromStr;

use serde::Serialize;

use super::bloom::{
    BloomFilter, FilterSizeMode, FilterStats, KeyHash, ModFilter, Probe, Reducer,
    ShiftFilter, PREFETCH_DISTANCE,
};
use super::cardinality::CardinalityEstimator;
use super::fragment::{merge_overlapping, Fragment};
use super::nthash::NtHash;
use super::{read_u32_le, read_u64_le, KebabError};

/// File extension for serialised indexes.
pub const FILE_EXTENSION: &str = "kbb";

/// Seed for re-mixing canonical hashes before cardinality estimation.
const ESTIMATOR_SEED: u64 = 0xe17a1465;

// ---------------------------------------------------------------------------
// K-mer mode
// ---------------------------------------------------------------------------

/// Which hashes of a k-mer enter the filter at build time, and which is
/// probed at scan time. The ordinals are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KmerMode {
    /// Insert forward and reverse-complement hashes; probe forward.
    Both,
    /// Insert and probe `min(forward, reverse-complement)`.
    Canonical,
    /// Insert and probe the forward hash only.
    Forward,
}

impl KmerMode {
    pub fn as_u32(self) -> u32 {
        match self {
            KmerMode::Both => 0,
            KmerMode::Canonical => 1,
            KmerMode::Forward => 2,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(KmerMode::Both),
            1 => Some(KmerMode::Canonical),
            2 => Some(KmerMode::Forward),
            _ => None,
        }
    }

    /// Whether build-time hashing needs the reverse-complement hash.
    #[inline]
    fn build_rc(self) -> bool {
        !matches!(self, KmerMode::Forward)
    }

    /// Whether scan-time hashing needs the reverse-complement hash.
    #[inline]
    fn scan_rc(self) -> bool {
        matches!(self, KmerMode::Canonical)
    }
}

impl FromStr for KmerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(KmerMode::Both),
            "canonical" => Ok(KmerMode::Canonical),
            "forward" => Ok(KmerMode::Forward),
            other => Err(format!(
                "unknown k-mer mode '{other}' (expected both, canonical, or forward)"
            )),
        }
    }
}

impl std::fmt::Display for KmerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KmerMode::Both => "both",
            KmerMode::Canonical => "canonical",
            KmerMode::Forward => "forward",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Construction parameters
// ---------------------------------------------------------------------------

/// Parameters for building an index from scratch.
#[derive(Debug, Clone)]
pub struct IndexParams {
    pub k: usize,
    /// Planned number of filter inserts. Callers without an exact count run
    /// the cardinality estimator first (see [`observe_sequence`]).
    pub expected_kmers: u64,
    pub fp_rate: f64,
    /// 0 derives the optimal hash count.
    pub num_hashes: usize,
    pub kmer_mode: KmerMode,
    pub size_mode: FilterSizeMode,
}

// ---------------------------------------------------------------------------
// Index stats
// ---------------------------------------------------------------------------

/// Parameters and occupancy of an index, serialisable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub k: usize,
    pub kmer_mode: KmerMode,
    pub filter: FilterStats,
}

// ---------------------------------------------------------------------------
// KebabIndex
// ---------------------------------------------------------------------------

enum AnyFilter {
    Shift(ShiftFilter),
    Mod(ModFilter),
}

/// A k-mer membership index over a reference corpus.
///
/// `add_sequence` is safe to call concurrently through a shared reference
/// (inserts are atomic); `scan_read` only reads and may run from any number
/// of threads.
pub struct KebabIndex {
    k: usize,
    kmer_mode: KmerMode,
    size_mode: FilterSizeMode,
    filter: AnyFilter,
}

impl KebabIndex {
    /// Allocate an empty index for the given parameters.
    pub fn new(params: &IndexParams) -> Result<Self, KebabError> {
        if params.k == 0 {
            return Err(KebabError::InvalidParameter(
                "k must be greater than 0".into(),
            ));
        }
        let filter = match params.size_mode {
            FilterSizeMode::Exact => AnyFilter::Mod(ModFilter::new(
                params.expected_kmers,
                params.fp_rate,
                params.num_hashes,
                params.size_mode,
            )?),
            rounded => AnyFilter::Shift(ShiftFilter::new(
                params.expected_kmers,
                params.fp_rate,
                params.num_hashes,
                rounded,
            )?),
        };
        Ok(Self {
            k: params.k,
            kmer_mode: params.kmer_mode,
            size_mode: params.size_mode,
            filter,
        })
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn kmer_mode(&self) -> KmerMode {
        self.kmer_mode
    }

    #[inline]
    pub fn size_mode(&self) -> FilterSizeMode {
        self.size_mode
    }

    pub fn stats(&self) -> IndexStats {
        let filter = match &self.filter {
            AnyFilter::Shift(f) => f.stats(),
            AnyFilter::Mod(f) => f.stats(),
        };
        IndexStats {
            k: self.k,
            kmer_mode: self.kmer_mode,
            filter,
        }
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Insert every k-mer of `seq` according to the k-mer mode. Sequences
    /// shorter than `k` contribute no windows.
    pub fn add_sequence(&self, seq: &[u8]) {
        match &self.filter {
            AnyFilter::Shift(f) => self.add_sequence_impl(f, seq),
            AnyFilter::Mod(f) => self.add_sequence_impl(f, seq),
        }
    }

    fn add_sequence_impl<H: KeyHash, R: Reducer>(
        &self,
        filter: &BloomFilter<H, R>,
        seq: &[u8],
    ) {
        if seq.len() < self.k {
            return;
        }
        let mut hasher = NtHash::new(self.k, self.kmer_mode.build_rc(), seq);
        loop {
            match self.kmer_mode {
                KmerMode::Forward => filter.add(hasher.forward()),
                KmerMode::Both => {
                    filter.add(hasher.forward());
                    filter.add(hasher.reverse_complement());
                }
                KmerMode::Canonical => filter.add(hasher.canonical()),
            }
            if !hasher.roll() {
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// Break `seq` into the maximal ranges whose every k-mer tests positive
    /// in the filter, keeping ranges of at least `min_mem_length` bases.
    ///
    /// `remove_overlaps` folds overlapping ranges together;
    /// `prefetch` pipelines the filter probes through a prefetch ring and
    /// requires `min_mem_length > k`.
    pub fn scan_read(
        &self,
        seq: &[u8],
        min_mem_length: usize,
        remove_overlaps: bool,
        prefetch: bool,
    ) -> Result<Vec<Fragment>, KebabError> {
        if prefetch {
            if min_mem_length <= self.k {
                return Err(KebabError::InvalidParameter(format!(
                    "min_mem_length ({min_mem_length}) must be greater than k ({}) \
                     for prefetch scanning",
                    self.k
                )));
            }
        } else if min_mem_length < self.k {
            return Err(KebabError::InvalidParameter(format!(
                "min_mem_length ({min_mem_length}) must be at least k ({})",
                self.k
            )));
        }

        let mut fragments = match (&self.filter, prefetch) {
            (AnyFilter::Shift(f), false) => self.scan_impl(f, seq, min_mem_length),
            (AnyFilter::Shift(f), true) => self.scan_prefetch_impl(f, seq, min_mem_length),
            (AnyFilter::Mod(f), false) => self.scan_impl(f, seq, min_mem_length),
            (AnyFilter::Mod(f), true) => self.scan_prefetch_impl(f, seq, min_mem_length),
        };
        if remove_overlaps {
            merge_overlapping(&mut fragments);
        }
        Ok(fragments)
    }

    /// Scan-time probe key for the current window.
    #[inline]
    fn scan_key(&self, hasher: &NtHash<'_>) -> u64 {
        if self.kmer_mode.scan_rc() {
            hasher.canonical()
        } else {
            hasher.forward()
        }
    }

    fn scan_impl<H: KeyHash, R: Reducer>(
        &self,
        filter: &BloomFilter<H, R>,
        seq: &[u8],
        min_mem_length: usize,
    ) -> Vec<Fragment> {
        let k = self.k;
        let mut fragments = Vec::new();
        let mut start = 0usize;

        if seq.len() >= k {
            let mut hasher = NtHash::new(k, self.kmer_mode.scan_rc(), seq);
            // A k-mer is identified by the index of its last base.
            for i in (k - 1)..seq.len() {
                if !filter.contains(self.scan_key(&hasher)) {
                    close_fragment(&mut fragments, start, i, min_mem_length);
                    // Move just past the first base of the offending k-mer.
                    start = i - k + 2;
                }
                hasher.roll();
            }
        }
        close_fragment(&mut fragments, start, seq.len(), min_mem_length);
        fragments
    }

    /// Prefetch variant: a ring of `PREFETCH_DISTANCE / K` in-flight probes
    /// keeps the memory subsystem ahead of the fragmentation state machine.
    fn scan_prefetch_impl<H: KeyHash, R: Reducer>(
        &self,
        filter: &BloomFilter<H, R>,
        seq: &[u8],
        min_mem_length: usize,
    ) -> Vec<Fragment> {
        let k = self.k;
        let mut fragments = Vec::new();
        let mut start = 0usize;

        if seq.len() >= k {
            let num_windows = seq.len() - k + 1;
            let depth = (PREFETCH_DISTANCE / filter.num_hashes())
                .max(1)
                .min(num_windows);
            let mut ring = vec![Probe::empty(); depth];
            let mut hasher = NtHash::new(k, self.kmer_mode.scan_rc(), seq);
            let mut checked = 0usize;

            for w in 0..num_windows {
                if w >= depth {
                    // Resolve the oldest ticket before reusing its slot.
                    let hit = filter.check(&ring[checked % depth]);
                    if !hit {
                        let i = checked + k - 1;
                        close_fragment(&mut fragments, start, i, min_mem_length);
                        start = i - k + 2;
                    }
                    checked += 1;
                }
                ring[w % depth] = filter.prefetch(self.scan_key(&hasher));
                hasher.roll();
            }

            // Drain the ring.
            while checked < num_windows {
                let hit = filter.check(&ring[checked % depth]);
                if !hit {
                    let i = checked + k - 1;
                    close_fragment(&mut fragments, start, i, min_mem_length);
                    start = i - k + 2;
                }
                checked += 1;
            }
        }
        close_fragment(&mut fragments, start, seq.len(), min_mem_length);
        fragments
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Serialise the index: the size-mode option header, then `k`, the k-mer
    /// mode, and the filter body. Little-endian throughout.
    pub fn save<W: Write>(&self, out: &mut W) -> Result<(), KebabError> {
        out.write_all(&self.size_mode.as_u32().to_le_bytes())?;
        out.write_all(&(self.k as u64).to_le_bytes())?;
        out.write_all(&self.kmer_mode.as_u32().to_le_bytes())?;
        match &self.filter {
            AnyFilter::Shift(f) => f.save(out),
            AnyFilter::Mod(f) => f.save(out),
        }
    }

    /// Load a serialised index, validating the enum ordinals and that the
    /// filter size agrees with the reducer implied by the size mode.
    pub fn load<Rd: Read>(input: &mut Rd) -> Result<Self, KebabError> {
        let raw_mode = read_u32_le(input)?;
        let size_mode = FilterSizeMode::from_u32(raw_mode).ok_or_else(|| {
            KebabError::InvalidIndexFile(format!("unknown filter-size mode ordinal {raw_mode}"))
        })?;

        let k = read_u64_le(input)? as usize;
        if k == 0 {
            return Err(KebabError::InvalidIndexFile("k is zero".into()));
        }

        let raw_kmer_mode = read_u32_le(input)?;
        let kmer_mode = KmerMode::from_u32(raw_kmer_mode).ok_or_else(|| {
            KebabError::InvalidIndexFile(format!("unknown k-mer mode ordinal {raw_kmer_mode}"))
        })?;

        let filter = match size_mode {
            FilterSizeMode::Exact => AnyFilter::Mod(ModFilter::load(input)?),
            _ => AnyFilter::Shift(ShiftFilter::load(input)?),
        };

        Ok(Self {
            k,
            kmer_mode,
            size_mode,
            filter,
        })
    }
}

/// Append `[start, end)` as a fragment if it is long enough.
#[inline]
fn close_fragment(fragments: &mut Vec<Fragment>, start: usize, end: usize, min_len: usize) {
    if end - start >= min_len {
        fragments.push(Fragment {
            start,
            length: end - start,
        });
    }
}

// ---------------------------------------------------------------------------
// Cardinality pass
// ---------------------------------------------------------------------------

/// Feed one sequence's k-mer hashes into the estimator, exactly as
/// [`KebabIndex::add_sequence`] would feed them into the filter. Canonical
/// hashes are re-mixed first: the min of two hashes is not uniform enough
/// for the estimator's leading-zero statistics.
pub fn observe_sequence(
    estimator: &mut CardinalityEstimator,
    k: usize,
    kmer_mode: KmerMode,
    seq: &[u8],
) {
    if seq.len() < k {
        return;
    }
    let mut hasher = NtHash::new(k, kmer_mode.build_rc(), seq);
    loop {
        match kmer_mode {
            KmerMode::Forward => estimator.insert(hasher.forward()),
            KmerMode::Both => {
                estimator.insert(hasher.forward());
                estimator.insert(hasher.reverse_complement());
            }
            KmerMode::Canonical => estimator.insert(super::bloom::murmur_mix64(
                hasher.canonical(),
                ESTIMATOR_SEED,
            )),
        }
        if !hasher.roll() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
