//! Bloom filter over 64-bit k-mer hashes.
//!
//! The filter is parameterised over a key-hash strategy (`Multiply`,
//! `Murmur`) and a domain reducer (`Shift` for power-of-two sizes, `Mod`
//! otherwise), composed at compile time so the probe loop carries no dynamic
//! dispatch. Inserts are lock-free atomic word ORs, so one immutable filter
//! reference can be shared across build workers.
//!
//! Scan-time callers can split each membership test into `prefetch` (compute
//! the probe positions and warm the cache lines) and `check` (resolve the
//! probe), hiding DRAM latency behind a ring of in-flight probes.

use std::io::{Read, Write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::{read_u64_le, KebabError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Probe seeds; the filter supports at most `SEEDS.len()` hash functions.
const SEEDS: [u64; 32] = [
    0x153C67147CEBD9C1, 0xE9E9221977E2486E,
    0xBD2A5DE364F86CEC, 0xF53E63242C7C96CA,
    0xEA71F713607B8025, 0xDA1DC2E81860AC93,
    0x700FC578B9B89EFC, 0x7ED09A9433D0F542,
    0xED43BDEDBCF69432, 0x1D322B028A861DAA,
    0x6E8CDB8F04EE5FFD, 0xEC53221EFD3A5C53,
    0x01EE14F09892D967, 0xD6382ACCCBCF0420,
    0xD448F78598D09FBE, 0x922AA2623D2BF77A,
    0x4AF98D70BD02F4D9, 0xBE9A532696D539D9,
    0x57CB1CF8FA6F105D, 0x4347990C105CF57C,
    0xD5E6B9B31C51D5D6, 0x2196C4CF3D467371,
    0x78BD99C62BA864CD, 0x0B747BD60B9F2FB4,
    0xE636A63B15DC2C60, 0xE3D4C1379D7C2FF0,
    0x2B5C7FAF45C1B370, 0xFE0247B305095328,
    0xE4F3205AADABEA31, 0xD631A450CF4BA7BA,
    0x7E0034EEC6C9E610, 0xCAF71C56BB5D4B4D,
];

/// Upper bound on the number of hash functions (size of the seed table).
pub const MAX_HASHES: usize = SEEDS.len();

/// Cache lines kept in flight by the prefetch pipeline; a scan holds
/// `PREFETCH_DISTANCE / K` probes so each completes in DRAM before it is
/// consumed.
pub const PREFETCH_DISTANCE: usize = 64;

const BITS_PER_WORD: u64 = 64;

fn num_words(bits: u64) -> usize {
    bits.div_ceil(BITS_PER_WORD) as usize
}

fn previous_power_of_two(x: u64) -> u64 {
    if x == 0 {
        return 1;
    }
    1u64 << (63 - x.leading_zeros())
}

fn next_power_of_two(x: u64) -> u64 {
    if x == 0 {
        return 1;
    }
    x.next_power_of_two()
}

// ---------------------------------------------------------------------------
// Filter-size mode
// ---------------------------------------------------------------------------

/// Post-rounding applied to the computed optimal bit count.
///
/// Power-of-two sizes admit the shift reducer; `Exact` keeps the computed
/// size and forces the modulo reducer. The ordinals are part of the on-disk
/// format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterSizeMode {
    Exact,
    NextPowerOfTwo,
    PreviousPowerOfTwo,
}

impl FilterSizeMode {
    pub fn as_u32(self) -> u32 {
        match self {
            FilterSizeMode::Exact => 0,
            FilterSizeMode::NextPowerOfTwo => 1,
            FilterSizeMode::PreviousPowerOfTwo => 2,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(FilterSizeMode::Exact),
            1 => Some(FilterSizeMode::NextPowerOfTwo),
            2 => Some(FilterSizeMode::PreviousPowerOfTwo),
            _ => None,
        }
    }

    fn round(self, bits: u64) -> u64 {
        match self {
            FilterSizeMode::Exact => bits.max(1),
            FilterSizeMode::NextPowerOfTwo => next_power_of_two(bits),
            FilterSizeMode::PreviousPowerOfTwo => previous_power_of_two(bits),
        }
    }
}

// ---------------------------------------------------------------------------
// Key hashes
// ---------------------------------------------------------------------------

/// Seeded 64-bit key hash, composed with a [`Reducer`] to form a probe.
pub trait KeyHash {
    fn hash(x: u64, seed: u64) -> u64;
}

/// Single multiply by the seed. Cheap, and sufficient for keys that are
/// already well mixed (ntHash values are).
pub struct Multiply;

impl KeyHash for Multiply {
    #[inline]
    fn hash(x: u64, seed: u64) -> u64 {
        x.wrapping_mul(seed)
    }
}

/// MurmurHash2 64A. Stronger mixing for keys with structure.
pub struct Murmur;

impl KeyHash for Murmur {
    #[inline]
    fn hash(x: u64, seed: u64) -> u64 {
        murmur_mix64(x, seed)
    }
}

/// MurmurHash2 64-bit finaliser over a single u64.
///
/// Also used to re-mix canonical hashes before cardinality estimation: the
/// min() of two hashes skews the leading-zero distribution the estimator
/// depends on.
#[inline]
pub fn murmur_mix64(x: u64, seed: u64) -> u64 {
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;

    let mut h = seed ^ 8u64.wrapping_mul(M);
    let mut k = x;

    k = k.wrapping_mul(M);
    k ^= k >> R;
    k = k.wrapping_mul(M);

    h ^= k;
    h = h.wrapping_mul(M);

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;

    h
}

// ---------------------------------------------------------------------------
// Reducers
// ---------------------------------------------------------------------------

/// Maps a 64-bit hash into `[0, m)`.
pub trait Reducer {
    fn new(bits: u64) -> Self;
    fn reduce(&self, h: u64) -> u64;

    /// Whether this reducer can serve a domain of `bits` bits. Checked when
    /// loading a filter whose size was chosen by an earlier run.
    fn accepts(bits: u64) -> bool {
        let _ = bits;
        true
    }
}

/// Top-bits shift; requires a power-of-two domain.
pub struct ShiftReducer {
    shift: u32,
}

impl Reducer for ShiftReducer {
    fn new(bits: u64) -> Self {
        debug_assert!(bits.is_power_of_two());
        // A one-bit domain would need a full 64-bit shift; treat it as two.
        Self {
            shift: 64 - bits.trailing_zeros().max(1),
        }
    }

    #[inline]
    fn reduce(&self, h: u64) -> u64 {
        h >> self.shift
    }

    fn accepts(bits: u64) -> bool {
        bits.is_power_of_two()
    }
}

/// Modulo; works for any domain size.
pub struct ModReducer {
    bits: u64,
}

impl Reducer for ModReducer {
    fn new(bits: u64) -> Self {
        Self { bits }
    }

    #[inline]
    fn reduce(&self, h: u64) -> u64 {
        h % self.bits
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// An in-flight membership test: the word indices and masks of the K bit
/// probes for one key. Fixed-size so a prefetch ring needs no per-probe
/// allocation.
#[derive(Clone, Copy)]
pub struct Probe {
    len: usize,
    words: [usize; MAX_HASHES],
    masks: [u64; MAX_HASHES],
}

impl Probe {
    pub const fn empty() -> Self {
        Self {
            len: 0,
            words: [0; MAX_HASHES],
            masks: [0; MAX_HASHES],
        }
    }
}

// ---------------------------------------------------------------------------
// Filter statistics
// ---------------------------------------------------------------------------

/// Snapshot of filter occupancy, serialisable next to the index.
#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub desired_fp_rate: f64,
    pub observed_fp_rate: f64,
    pub num_hashes: usize,
    pub num_set_bits: u64,
    pub num_bits: u64,
    pub load_factor: f64,
}

// ---------------------------------------------------------------------------
// BloomFilter
// ---------------------------------------------------------------------------

/// Approximate set over 64-bit values.
///
/// The first probe elides its seed and applies the reducer directly to the
/// key; probes `1..K` hash with `SEEDS[i]` first. `add`, `contains`, and
/// `prefetch` share one position loop so the choice cannot diverge between
/// insert and query.
pub struct BloomFilter<H: KeyHash, R: Reducer> {
    bits: u64,
    set_bits: AtomicU64,
    words: Box<[AtomicU64]>,
    num_hashes: usize,
    reducer: R,
    desired_fp_rate: f64,
    _hash: PhantomData<H>,
}

/// Multiply-hash filter over a power-of-two domain (rounded size modes).
pub type ShiftFilter = BloomFilter<Multiply, ShiftReducer>;
/// Multiply-hash filter over an exact domain.
pub type ModFilter = BloomFilter<Multiply, ModReducer>;

impl<H: KeyHash, R: Reducer> BloomFilter<H, R> {
    /// Size and allocate a filter for `elements` planned inserts at the
    /// target false-positive rate.
    ///
    /// `num_hashes = 0` derives the hash count that minimises the
    /// theoretical FP rate for the rounded size.
    pub fn new(
        elements: u64,
        fp_rate: f64,
        num_hashes: usize,
        size_mode: FilterSizeMode,
    ) -> Result<Self, KebabError> {
        if !(fp_rate > 0.0 && fp_rate < 1.0) {
            return Err(KebabError::InvalidParameter(format!(
                "false-positive rate must be between 0 and 1, not {fp_rate}"
            )));
        }
        if elements == 0 {
            return Err(KebabError::InvalidParameter(
                "planned element count must be greater than 0".into(),
            ));
        }

        let raw_bits = if num_hashes == 0 {
            optimal_bits(elements, fp_rate)
        } else {
            optimal_bits_with_hashes(elements, fp_rate, num_hashes)
        };
        let bits = size_mode.round(raw_bits);

        let num_hashes = if num_hashes == 0 {
            optimal_num_hashes(fp_rate, elements, bits)
        } else {
            num_hashes
        };
        if num_hashes >= MAX_HASHES {
            return Err(KebabError::InvalidParameter(format!(
                "number of hashes must be less than {MAX_HASHES}, not {num_hashes}"
            )));
        }

        let words = (0..num_words(bits)).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            bits,
            set_bits: AtomicU64::new(0),
            words,
            num_hashes,
            reducer: R::new(bits),
            desired_fp_rate: fp_rate,
            _hash: PhantomData,
        })
    }

    #[inline]
    pub fn num_bits(&self) -> u64 {
        self.bits
    }

    #[inline]
    pub fn num_set_bits(&self) -> u64 {
        self.set_bits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Bit index of probe `i` for `val`. Probe 0 is the reduced key itself.
    #[inline]
    fn probe_index(&self, val: u64, i: usize) -> u64 {
        if i == 0 {
            self.reducer.reduce(val)
        } else {
            self.reducer.reduce(H::hash(val, SEEDS[i]))
        }
    }

    /// Insert `val`. Safe to call concurrently through a shared reference;
    /// inserts are monotonic idempotent bit-sets with relaxed ordering.
    pub fn add(&self, val: u64) {
        for i in 0..self.num_hashes {
            let idx = self.probe_index(val, i);
            let word = (idx / BITS_PER_WORD) as usize;
            let mask = 1u64 << (idx % BITS_PER_WORD);
            let prev = self.words[word].fetch_or(mask, Ordering::Relaxed);
            if prev & mask == 0 {
                self.set_bits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Whether `val` may have been inserted (one-sided error: a `false`
    /// answer is definite).
    pub fn contains(&self, val: u64) -> bool {
        for i in 0..self.num_hashes {
            let idx = self.probe_index(val, i);
            let word = (idx / BITS_PER_WORD) as usize;
            let mask = 1u64 << (idx % BITS_PER_WORD);
            if self.words[word].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Compute the probe for `val` and warm its cache lines. Resolve it
    /// later with [`check`](Self::check).
    #[inline]
    pub fn prefetch(&self, val: u64) -> Probe {
        let mut probe = Probe::empty();
        probe.len = self.num_hashes;
        for i in 0..self.num_hashes {
            let idx = self.probe_index(val, i);
            let word = (idx / BITS_PER_WORD) as usize;
            probe.words[i] = word;
            probe.masks[i] = 1u64 << (idx % BITS_PER_WORD);
            self.prefetch_word(word);
        }
        probe
    }

    /// Resolve a previously issued probe.
    #[inline]
    pub fn check(&self, probe: &Probe) -> bool {
        for i in 0..probe.len {
            if self.words[probe.words[i]].load(Ordering::Relaxed) & probe.masks[i] == 0 {
                return false;
            }
        }
        true
    }

    #[inline]
    fn prefetch_word(&self, word: usize) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            _mm_prefetch::<_MM_HINT_T0>(self.words.as_ptr().add(word) as *const i8);
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = word;
    }

    /// Occupancy snapshot; the observed FP rate is `(set_bits / m)^K`.
    pub fn stats(&self) -> FilterStats {
        let load_factor = self.num_set_bits() as f64 / self.bits as f64;
        FilterStats {
            desired_fp_rate: self.desired_fp_rate,
            observed_fp_rate: load_factor.powi(self.num_hashes as i32),
            num_hashes: self.num_hashes,
            num_set_bits: self.num_set_bits(),
            num_bits: self.bits,
            load_factor,
        }
    }

    // -----------------------------------------------------------------------
    // Persistence (filter body; the index prepends its option header)
    // -----------------------------------------------------------------------

    /// Serialise as `m, num_set_bits, words, K`, all little-endian.
    pub fn save<W: Write>(&self, out: &mut W) -> Result<(), KebabError> {
        out.write_all(&self.bits.to_le_bytes())?;
        out.write_all(&self.num_set_bits().to_le_bytes())?;
        for word in self.words.iter() {
            out.write_all(&word.load(Ordering::Relaxed).to_le_bytes())?;
        }
        out.write_all(&(self.num_hashes as u64).to_le_bytes())?;
        Ok(())
    }

    /// Deserialise a filter body. The desired FP rate is not stored, so the
    /// loaded filter reports it as 0.
    pub fn load<Rd: Read>(input: &mut Rd) -> Result<Self, KebabError> {
        let bits = read_u64_le(input)?;
        if bits == 0 {
            return Err(KebabError::InvalidIndexFile(
                "filter bit count is zero".into(),
            ));
        }
        if !R::accepts(bits) {
            return Err(KebabError::InvalidIndexFile(format!(
                "filter bit count {bits} does not fit the reducer implied by \
                 the size mode"
            )));
        }
        let set_bits = read_u64_le(input)?;
        let mut words = Vec::with_capacity(num_words(bits));
        for _ in 0..num_words(bits) {
            words.push(AtomicU64::new(read_u64_le(input)?));
        }
        let num_hashes = read_u64_le(input)? as usize;
        if num_hashes == 0 || num_hashes >= MAX_HASHES {
            return Err(KebabError::InvalidIndexFile(format!(
                "hash count {num_hashes} out of range"
            )));
        }
        Ok(Self {
            bits,
            set_bits: AtomicU64::new(set_bits),
            words: words.into_boxed_slice(),
            num_hashes,
            reducer: R::new(bits),
            desired_fp_rate: 0.0,
            _hash: PhantomData,
        })
    }
}

// ---------------------------------------------------------------------------
// Sizing formulas
// ---------------------------------------------------------------------------

/// `m = -n ln p / (ln 2)^2` — optimal bits with the hash count free.
fn optimal_bits(elements: u64, fp_rate: f64) -> u64 {
    (-(elements as f64) * fp_rate.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2))
        as u64
}

/// `m = -K n / ln(1 - p^(1/K))` — optimal bits for an explicit hash count.
fn optimal_bits_with_hashes(elements: u64, fp_rate: f64, num_hashes: usize) -> u64 {
    let k = num_hashes as f64;
    (-k * elements as f64 / (1.0 - fp_rate.powf(1.0 / k)).ln()) as u64
}

/// `K* = -ln p / ln 2`, rounded towards whichever of floor/ceil minimises
/// the theoretical FP rate `(1 - e^(-K n / m))^K` at the final size.
fn optimal_num_hashes(fp_rate: f64, elements: u64, bits: u64) -> usize {
    let k = -fp_rate.ln() / std::f64::consts::LN_2;
    let k_floor = k.floor() as usize;
    let k_ceil = k.ceil() as usize;
    if k_floor == 0 {
        return k_ceil;
    }

    let fp = |k: usize| -> f64 {
        let exponent = -(k as f64) * elements as f64 / bits as f64;
        (1.0 - exponent.exp()).powi(k as i32)
    };

    if fp(k_ceil) < fp(k_floor) {
        k_ceil
    } else {
        k_floor
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
