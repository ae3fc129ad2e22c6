//! Seeded RNG wrapper for reproducible noise and failure decisions.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random source.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded when `seed` is given, otherwise seeded from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Bernoulli draw with probability `rate`, clamped to [0, 1].
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform value in [0.0, 1.0).
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen()
    }

    /// Approximately normal noise with standard deviation `sigma`.
    ///
    /// Sum of twelve uniforms (Irwin-Hall), which is plenty for sensor noise.
    pub fn gaussian(&self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return 0.0;
        }
        let mut rng = self.inner.lock();
        let sum: f64 = (0..12).map(|_| rng.gen::<f64>()).sum();
        (sum - 6.0) * sigma
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").finish_non_exhaustive()
    }
}
