//! ntHash rolling nucleotide hash.
//!
//! Produces a 64-bit forward hash — and, when enabled, a reverse-complement
//! hash — for every k-mer window of a DNA sequence, with O(1) updates when
//! sliding the window by one base.
//!
//! The per-base seed tables rotated left by `k` (used to evict the outgoing
//! base in a single indirection) are computed once per `k` and shared across
//! all hasher instances.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

// ---------------------------------------------------------------------------
// Seed tables
// ---------------------------------------------------------------------------

// Per-nucleotide seed constants from the ntHash paper
// (Mohamadi et al., Bioinformatics 2016).
const SEED_A: u64 = 0x3c8bfbb395c60474;
const SEED_C: u64 = 0x3193c18562a02b4c;
const SEED_G: u64 = 0x20323ed082572324;
const SEED_T: u64 = 0x295549f54be24456;

/// Byte → seed. Upper- and lowercase ACGT map to their seeds; every other
/// byte maps to zero and contributes nothing to the hash.
const SEED_TABLE: [u64; 256] = {
    let mut table = [0u64; 256];
    table[b'A' as usize] = SEED_A;
    table[b'a' as usize] = SEED_A;
    table[b'C' as usize] = SEED_C;
    table[b'c' as usize] = SEED_C;
    table[b'G' as usize] = SEED_G;
    table[b'g' as usize] = SEED_G;
    table[b'T' as usize] = SEED_T;
    table[b't' as usize] = SEED_T;
    table
};

/// Byte → seed of its complement (A↔T, C↔G).
const RC_SEED_TABLE: [u64; 256] = {
    let mut table = [0u64; 256];
    table[b'A' as usize] = SEED_T;
    table[b'a' as usize] = SEED_T;
    table[b'C' as usize] = SEED_G;
    table[b'c' as usize] = SEED_G;
    table[b'G' as usize] = SEED_C;
    table[b'g' as usize] = SEED_C;
    table[b'T' as usize] = SEED_A;
    table[b't' as usize] = SEED_A;
    table
};

// ---------------------------------------------------------------------------
// Per-k rolled tables
// ---------------------------------------------------------------------------

/// Seed tables pre-rotated left by `k`, so the roll step evicts the outgoing
/// base with one lookup instead of a rotate.
pub struct RolKTables {
    fwd: [u64; 256],
    rc: [u64; 256],
}

impl RolKTables {
    fn new(k: usize) -> Self {
        let mut fwd = [0u64; 256];
        let mut rc = [0u64; 256];
        for b in 0..256 {
            fwd[b] = SEED_TABLE[b].rotate_left(k as u32);
            rc[b] = RC_SEED_TABLE[b].rotate_left(k as u32);
        }
        Self { fwd, rc }
    }
}

/// Global per-`k` table cache. Populated under the map's shard locks on
/// first use of a given `k`; immutable afterwards.
fn rol_k_tables(k: usize) -> Arc<RolKTables> {
    static CACHE: OnceLock<DashMap<usize, Arc<RolKTables>>> = OnceLock::new();
    CACHE
        .get_or_init(DashMap::new)
        .entry(k)
        .or_insert_with(|| Arc::new(RolKTables::new(k)))
        .clone()
}

// ---------------------------------------------------------------------------
// NtHash
// ---------------------------------------------------------------------------

/// Rolling hash state over a borrowed sequence.
///
/// `pos` is the start of the current window; the window covers
/// `seq[pos..pos + k)`. When the sequence is shorter than `k`, `pos` is set
/// to `seq.len()` and no window is valid.
pub struct NtHash<'s> {
    k: usize,
    use_rc: bool,
    seq: &'s [u8],
    pos: usize,
    fwd: u64,
    rc: u64,
    tables: Arc<RolKTables>,
}

impl<'s> NtHash<'s> {
    /// Position the hasher over the first window of `seq`.
    ///
    /// `use_rc` enables the reverse-complement hash; leave it off when only
    /// the forward hash will be consumed.
    pub fn new(k: usize, use_rc: bool, seq: &'s [u8]) -> Self {
        debug_assert!(k >= 1);
        let mut hasher = Self {
            k,
            use_rc,
            seq,
            pos: 0,
            fwd: 0,
            rc: 0,
            tables: rol_k_tables(k),
        };
        hasher.set_sequence(seq);
        hasher
    }

    /// Re-point the hasher at a new sequence and hash its first window.
    pub fn set_sequence(&mut self, seq: &'s [u8]) {
        self.seq = seq;
        self.fwd = 0;
        self.rc = 0;
        if seq.len() < self.k {
            // Hash undefined; no roll is valid from here.
            self.pos = seq.len();
            return;
        }
        self.pos = 0;
        for i in 0..self.k {
            let b = seq[i] as usize;
            self.fwd ^= SEED_TABLE[b].rotate_left((self.k - 1 - i) as u32);
            if self.use_rc {
                self.rc ^= RC_SEED_TABLE[b].rotate_left(i as u32);
            }
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Start position of the current window.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Forward-strand hash of the current window.
    #[inline]
    pub fn forward(&self) -> u64 {
        self.fwd
    }

    /// Reverse-complement hash of the current window. Only meaningful when
    /// the hasher was created with `use_rc`.
    #[inline]
    pub fn reverse_complement(&self) -> u64 {
        self.rc
    }

    /// Canonical hash: `min(forward, reverse-complement)`.
    #[inline]
    pub fn canonical(&self) -> u64 {
        self.fwd.min(self.rc)
    }

    /// Advance the window by one base. Returns `false` (leaving the state
    /// unchanged) when the window is already flush with the end.
    #[inline]
    pub fn roll(&mut self) -> bool {
        if self.pos + self.k >= self.seq.len() {
            return false;
        }
        let out = self.seq[self.pos] as usize;
        let inc = self.seq[self.pos + self.k] as usize;
        self.fwd = self.fwd.rotate_left(1) ^ self.tables.fwd[out] ^ SEED_TABLE[inc];
        if self.use_rc {
            self.rc =
                (self.rc ^ RC_SEED_TABLE[out] ^ self.tables.rc[inc]).rotate_right(1);
        }
        self.pos += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn revcomp(seq: &[u8]) -> Vec<u8> {
        seq.iter()
            .rev()
            .map(|b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                b'T' => b'A',
                other => *other,
            })
            .collect()
    }

    #[test]
    fn test_rolling_matches_from_scratch() {
        let seq = b"ACGTTGCAGTACGGCATTACGATCGATCGGAT";
        for k in [2usize, 4, 7, 20] {
            let mut rolled = NtHash::new(k, true, seq);
            for w in 0..=(seq.len() - k) {
                let scratch = NtHash::new(k, true, &seq[w..w + k]);
                assert_eq!(rolled.forward(), scratch.forward(), "k={k} window={w}");
                assert_eq!(
                    rolled.reverse_complement(),
                    scratch.reverse_complement(),
                    "k={k} window={w}"
                );
                if w < seq.len() - k {
                    assert!(rolled.roll());
                }
            }
            assert!(!rolled.roll());
        }
    }

    #[test]
    fn test_reverse_complement_identity() {
        // H_fwd(w) == H_rc(revcomp(w)) for any window.
        let seq = b"GGATCCAATTCGCGAT";
        for k in [3usize, 5, 8] {
            for w in 0..=(seq.len() - k) {
                let window = &seq[w..w + k];
                let fwd = NtHash::new(k, true, window);
                let revcomp_window = revcomp(window);
                let rc_of_rc = NtHash::new(k, true, &revcomp_window);
                assert_eq!(fwd.forward(), rc_of_rc.reverse_complement());
                assert_eq!(fwd.canonical(), rc_of_rc.canonical());
            }
        }
    }

    #[test]
    fn test_case_insensitive() {
        let upper = NtHash::new(4, true, b"ACGT");
        let lower = NtHash::new(4, true, b"acgt");
        assert_eq!(upper.forward(), lower.forward());
        assert_eq!(upper.reverse_complement(), lower.reverse_complement());
    }

    #[test]
    fn test_non_acgt_contributes_zero() {
        // Every non-ACGT byte maps to a zero seed, so an all-N window hashes
        // to zero on both strands.
        let h = NtHash::new(4, true, b"NNNN");
        assert_eq!(h.forward(), 0);
        assert_eq!(h.reverse_complement(), 0);

        // And rolling across an N behaves like rolling across a zero seed.
        let seq = b"ACGTNACGT";
        let mut rolled = NtHash::new(4, true, seq);
        for w in 0..=(seq.len() - 4) {
            let scratch = NtHash::new(4, true, &seq[w..w + 4]);
            assert_eq!(rolled.forward(), scratch.forward());
            if w < seq.len() - 4 {
                rolled.roll();
            }
        }
    }

    #[test]
    fn test_short_sequence_has_no_window() {
        let mut h = NtHash::new(8, true, b"ACGT");
        assert_eq!(h.pos(), 4);
        assert!(!h.roll());
    }

    #[test]
    fn test_distinct_kmers_distinct_hashes() {
        let a = NtHash::new(8, false, b"AAAAAAAA");
        let c = NtHash::new(8, false, b"CCCCCCCC");
        let m = NtHash::new(8, false, b"ACGTACGT");
        assert_ne!(a.forward(), c.forward());
        assert_ne!(a.forward(), m.forward());
        assert_ne!(c.forward(), m.forward());
    }

    #[test]
    fn test_tables_shared_per_k() {
        let t1 = rol_k_tables(21);
        let t2 = rol_k_tables(21);
        assert!(Arc::ptr_eq(&t1, &t2));
    }
}
