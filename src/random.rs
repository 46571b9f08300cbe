use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::SmallRng};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Source of the random suffixes used in storage object names.
pub trait RandomSource: Send + Sync {
    fn token(&self, len: usize) -> String;
}

/// Thread-local CSPRNG; the production source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn token(&self, len: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect()
    }
}

/// Deterministic source for tests and reproducible runs.
pub struct SeededRandom {
    rng: Mutex<SmallRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn token(&self, len: usize) -> String {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect()
    }
}

/// `RANDOM_SEED` pins object-name tokens for reproducible runs. Unset or
/// unparsable falls back to [`ThreadRandom`].
pub fn source_from_env() -> Arc<dyn RandomSource> {
    source_for_seed(
        std::env::var("RANDOM_SEED")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok()),
    )
}

pub fn source_for_seed(seed: Option<u64>) -> Arc<dyn RandomSource> {
    match seed {
        Some(seed) => {
            info!(target = "mintmark.random", seed, "seeded_random_source");
            Arc::new(SeededRandom::new(seed))
        }
        None => Arc::new(ThreadRandom),
    }
}
