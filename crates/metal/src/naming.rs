//! Hostname generation.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound (exclusive) of the numeric hostname suffix.
const SUFFIX_RANGE: u32 = 1000;

/// Generates `{prefix}-{n}` hostnames with `n` in `0..1000`.
///
/// Collisions are possible and tolerated: a colliding name simply reuses the
/// existing device.
#[derive(Debug)]
pub struct HostnameGenerator {
    rng: Mutex<StdRng>,
}

impl HostnameGenerator {
    /// Generator seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Next candidate hostname for `prefix`.
    pub fn next(&self, prefix: &str) -> String {
        let suffix = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .gen_range(0..SUFFIX_RANGE);
        format!("{prefix}-{suffix}")
    }
}

impl Default for HostnameGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
