//! HyperLogLog cardinality estimator.
//!
//! Sizes the Bloom filter when the caller has not supplied an expected
//! k-mer count: a first pass streams every k-mer hash through the estimator,
//! and the point estimate becomes the filter's planned element count.
//!
//! Dense representation, `2^20` registers (1 MiB per instance). Estimators
//! are mergeable, so build workers keep a local one and fold them together
//! at the end of the pass.

/// Register-index bits; `2^PRECISION` registers.
const PRECISION: u32 = 20;
const NUM_REGISTERS: usize = 1 << PRECISION;

pub struct CardinalityEstimator {
    registers: Box<[u8]>,
}

impl CardinalityEstimator {
    pub fn new() -> Self {
        Self {
            registers: vec![0u8; NUM_REGISTERS].into_boxed_slice(),
        }
    }

    /// Register a 64-bit hash. The top `PRECISION` bits select the register;
    /// the register keeps the maximum leading-zero run of the remainder.
    ///
    /// Inputs must be uniformly distributed: canonical k-mer hashes (a min of
    /// two hashes) need the murmur re-mix before insertion.
    #[inline]
    pub fn insert(&mut self, hash: u64) {
        let idx = (hash >> (64 - PRECISION)) as usize;
        let rest = hash << PRECISION;
        let rho = (rest.leading_zeros() + 1).min(64 - PRECISION + 1) as u8;
        if rho > self.registers[idx] {
            self.registers[idx] = rho;
        }
    }

    /// Fold another estimator into this one (register-wise max). The result
    /// estimates the union of both input streams.
    pub fn merge(&mut self, other: &CardinalityEstimator) {
        for (r, o) in self.registers.iter_mut().zip(other.registers.iter()) {
            *r = (*r).max(*o);
        }
    }

    /// Point estimate of the number of distinct inserted values, with the
    /// linear-counting correction for small cardinalities.
    pub fn estimate(&self) -> f64 {
        let m = NUM_REGISTERS as f64;
        let mut sum = 0.0f64;
        let mut zeros = 0u64;
        for &r in self.registers.iter() {
            sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }

        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let estimate = alpha * m * m / sum;
        if estimate <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            estimate
        }
    }

    /// Point estimate rounded up to a whole count.
    pub fn report(&self) -> u64 {
        self.estimate().ceil() as u64
    }

    /// Expected relative error of the estimate (`1.04 / sqrt(m)`).
    pub fn relative_error(&self) -> f64 {
        1.04 / (NUM_REGISTERS as f64).sqrt()
    }
}

impl Default for CardinalityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
