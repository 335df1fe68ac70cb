use crate::error::{DriftError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Characters a file id is drawn from: 26 lower, 26 upper, 10 digits.
pub const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const DEFAULT_ID_LENGTH: usize = 10;
pub const DEFAULT_MAX_ATTEMPTS: usize = 64;

/// Draws short random ids and retries until one is free.
pub struct IdGenerator {
    length: usize,
    max_attempts: usize,
    rng: Mutex<StdRng>,
}

impl IdGenerator {
    /// Generator seeded from the wall clock's nanoseconds, so separate process
    /// runs do not replay the same sequence.
    pub fn new(length: usize) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(length, seed)
    }

    pub fn with_seed(length: usize, seed: u64) -> Self {
        Self {
            length,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Draw ids until `is_taken` rejects none of them.
    ///
    /// The caller supplies the membership check so the table it consults is
    /// loaded once per call rather than once per draw.
    pub fn generate<F>(&self, is_taken: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut rng = self.rng.lock();

        for attempt in 1..=self.max_attempts {
            let candidate: String = (0..self.length)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();

            if !is_taken(&candidate) {
                return Ok(candidate);
            }

            tracing::debug!(attempt, candidate = %candidate, "file id collision, drawing again");
        }

        Err(DriftError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }
}
