//! Randomness strategies for ray generation and propagation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of uniform numbers in `[0, 1)`.
pub trait RandomSource {
    fn next(&mut self) -> f64;
}

/// Pseudo-random numbers from a seeded [`StdRng`].
#[derive(Debug, Clone)]
pub struct PrngSource {
    rng: StdRng,
}

impl PrngSource {
    /// Reproducible sequence for `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for PrngSource {
    fn next(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Always returns the same value; 0.5 picks the centre of every distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSource(pub f64);

impl Default for FixedSource {
    fn default() -> Self {
        Self(0.5)
    }
}

impl RandomSource for FixedSource {
    fn next(&mut self) -> f64 {
        self.0
    }
}
