//! Exponential backoff with jitter for throttled batch requests

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Computes `base * 2^attempt + jitter` delays
///
/// Jitter is drawn uniformly from `[0, jitter_max)` so concurrent batches that
/// were throttled together do not retry in lockstep. The generator can be
/// seeded for reproducible delays.
pub struct Backoff {
    base: Duration,
    jitter_max: Duration,
    rng: Mutex<StdRng>,
}

impl Backoff {
    pub fn new(base: Duration, jitter_max: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(base, jitter_max, rng)
    }

    pub fn with_rng(base: Duration, jitter_max: Duration, rng: StdRng) -> Self {
        Self {
            base,
            jitter_max,
            rng: Mutex::new(rng),
        }
    }

    /// Delay before retrying after the `attempt`-th (0-based) throttled call,
    /// without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before retrying after the `attempt`-th (0-based) throttled call
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt).saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        let fraction: f64 = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random();
        self.jitter_max.mul_f64(fraction)
    }
}
