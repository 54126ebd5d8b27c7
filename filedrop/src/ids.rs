//! Short random identifiers used as stored file names.
//!
//! Identifiers are drawn from a 62-symbol alphanumeric alphabet. They are meant to be short and
//! hard to guess casually, not unguessable: the generator is a seeded PRNG, not a CSPRNG, and
//! collisions at 5 characters are expected once a few hundred thousand files exist.

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::prelude::RngExt;
use rand::{SeedableRng, rngs::StdRng};

/// The identifier alphabet.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

const INDEX_BITS: u32 = 6;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
// Number of 6-bit indices available in one 64-bit draw.
const INDICES_PER_DRAW: u32 = 64 / INDEX_BITS;

/// Source of identifiers, shared by every request handler.
pub trait IdGenerator: Send + Sync {
    /// Produce an identifier of exactly `len` characters from [`ALPHABET`].
    fn generate(&self, len: usize) -> String;
}

/// Mutex-guarded PRNG seeded once at construction.
///
/// Every character is uniform over the alphabet: random words are cut into 6-bit indices and
/// indices past the end of the alphabet are discarded rather than folded back in.
#[derive(Debug)]
pub struct SeededGenerator {
    rng: Mutex<StdRng>,
}

impl SeededGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seed from the current wall-clock time in nanoseconds.
    pub fn from_time() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::new(seed)
    }

    /// Seed from `seed` when given, otherwise from the clock.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::new(seed),
            None => Self::from_time(),
        }
    }
}

impl IdGenerator for SeededGenerator {
    fn generate(&self, len: usize) -> String {
        let mut out = String::with_capacity(len);
        // A poisoned lock only means another thread panicked mid-draw; the RNG state is still valid.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let mut cache: u64 = rng.random();
        let mut remaining = INDICES_PER_DRAW;
        while out.len() < len {
            if remaining == 0 {
                cache = rng.random();
                remaining = INDICES_PER_DRAW;
            }
            let idx = (cache & INDEX_MASK) as usize;
            if idx < ALPHABET.len() {
                out.push(ALPHABET[idx] as char);
            }
            cache >>= INDEX_BITS;
            remaining -= 1;
        }
        out
    }
}
