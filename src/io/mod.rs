//! I/O Abstractions
//!
//! Randomness is injected through the `Rng` trait so that every decision the
//! rotation engine and the simulated object store make can be replayed from a
//! seed.
//!
//! - `ProductionRng`: OS-seeded generator for the daemon
//! - `SimulatedRng`: seeded ChaCha generator for tests and DST

pub mod simulation;

pub use simulation::SimulatedRng;

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Random number source
pub trait Rng: Send + 'static {
    /// Next raw 64-bit value
    fn next_u64(&mut self) -> u64;

    /// Returns true with the given probability (clamped to [0, 1])
    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

/// Production RNG seeded from the operating system
pub struct ProductionRng {
    inner: StdRng,
}

impl ProductionRng {
    pub fn new() -> Self {
        ProductionRng {
            inner: StdRng::from_entropy(),
        }
    }
}

impl Default for ProductionRng {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProductionRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductionRng").finish()
    }
}

impl Rng for ProductionRng {
    fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        use rand::Rng as _;
        self.inner.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        use rand::Rng as _;
        if min >= max {
            return min;
        }
        self.inner.gen_range(min..max)
    }
}
