//! Seeded deterministic RNG handle
//!
//! A single [`KernelRng`] is owned by the orchestrator and passed `&mut` to
//! every stochastic call site in a fixed visitation order, so two runs with
//! the same seed consume the stream identically.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic random source backed by ChaCha20
#[derive(Debug, Clone)]
pub struct KernelRng {
    rng: ChaCha20Rng,
}

impl KernelRng {
    /// Seed the kernel RNG
    pub fn seed_from(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Uniform f64 in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform integer in the inclusive range [lo, hi]
    pub fn uniform_int(&mut self, lo: u64, hi: u64) -> u64 {
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform index below `len`; `len` must be nonzero
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Bernoulli draw with probability `p` (clamped to [0, 1])
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p.clamp(0.0, 1.0)
    }

    /// Symmetric noise in [-amplitude, amplitude]
    pub fn noise(&mut self, amplitude: f64) -> f64 {
        (self.next_f64() * 2.0 - 1.0) * amplitude
    }

    /// In-place Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
