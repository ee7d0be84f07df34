use crate::seed::Seed;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::iter::FusedIterator;

/// Generator seed used when none is configured. Fixed so that a campaign can
/// be replayed byte-for-byte.
pub const DEFAULT_RNG_SEED: u64 = 104_729;

/// Number of mutants produced by a full value sweep, one per byte value.
pub const VALUE_SWEEP_LEN: usize = 256;

/// A `Mutator` derives one mutant from the seed bytes.
///
/// Every mutator in this crate preserves length: the returned buffer always
/// has exactly `seed.len()` bytes. The seed itself is never modified; each call
/// works on a fresh copy.
///
/// # Type Parameters
/// * `R`: The random number generator used for mutation decisions. Mutators
///   that are fully deterministic simply ignore it.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&mut self, seed: &[u8], rng: &mut R) -> Vec<u8>;
}

/// Replaces every occurrence of one byte value with `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullValueMutator {
    pub value: u8,
}

impl NullValueMutator {
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    pub fn apply(&self, seed: &[u8]) -> Vec<u8> {
        seed.iter()
            .map(|&b| if b == self.value { 0 } else { b })
            .collect()
    }
}

impl<R: Rng + ?Sized> Mutator<R> for NullValueMutator {
    fn mutate(&mut self, seed: &[u8], _rng: &mut R) -> Vec<u8> {
        self.apply(seed)
    }
}

/// Overwrites a random number of randomly chosen positions with random bytes.
///
/// The number of steps is drawn from `[0, len)`, then each step draws an
/// index from `[0, len)` and a value from the full byte range. Steps may hit
/// the same index more than once and may write back the original value.
///
/// An empty seed yields an empty mutant without consuming any randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomOverwriteMutator;

impl<R: Rng + ?Sized> Mutator<R> for RandomOverwriteMutator {
    fn mutate(&mut self, seed: &[u8], rng: &mut R) -> Vec<u8> {
        let mut bytes = seed.to_vec();
        if bytes.is_empty() {
            return bytes;
        }

        let len = bytes.len();
        let num_to_change = rng.random_range(0..len);
        for _ in 0..num_to_change {
            let index = rng.random_range(0..len);
            bytes[index] = rng.random_range(0..=u8::MAX);
        }
        bytes
    }
}

/// Lazy sequence of the 256 value-nulling mutants.
///
/// Values are visited in ascending signed order, `-128` through `127`, so the
/// high bytes `0x80..=0xFF` come before `0x00..=0x7F`.
#[derive(Debug, Clone)]
pub struct ValueSweep<'a> {
    seed: &'a [u8],
    next_value: i16,
}

impl<'a> ValueSweep<'a> {
    pub fn new(seed: &'a [u8]) -> Self {
        Self {
            seed,
            next_value: i8::MIN as i16,
        }
    }
}

impl Iterator for ValueSweep<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_value > i8::MAX as i16 {
            return None;
        }
        let value = self.next_value as i8 as u8;
        self.next_value += 1;
        Some(NullValueMutator::new(value).apply(self.seed))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (i8::MAX as i16 + 1 - self.next_value).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ValueSweep<'_> {}
impl FusedIterator for ValueSweep<'_> {}

/// Lazy sequence of `iterations` randomized corruption mutants drawn from a
/// borrowed generator.
#[derive(Debug)]
pub struct RandomCorruption<'a, R: Rng> {
    seed: &'a [u8],
    rng: &'a mut R,
    mutator: RandomOverwriteMutator,
    remaining: u64,
}

impl<'a, R: Rng> RandomCorruption<'a, R> {
    pub fn new(seed: &'a [u8], rng: &'a mut R, iterations: u64) -> Self {
        Self {
            seed,
            rng,
            mutator: RandomOverwriteMutator,
            remaining: iterations,
        }
    }
}

impl<R: Rng> Iterator for RandomCorruption<'_, R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.mutator.mutate(self.seed, self.rng))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl<R: Rng> FusedIterator for RandomCorruption<'_, R> {}

/// Produces the campaign's mutants from a single seed and a single generator.
///
/// The generator is seeded once, when the engine is built. Running the same
/// strategies in the same order on an engine built with the same generator
/// seed reproduces identical mutants.
#[derive(Debug)]
pub struct MutationEngine<R: Rng> {
    seed: Seed,
    rng: R,
}

impl MutationEngine<ChaCha8Rng> {
    /// Builds an engine around a `ChaCha8Rng` seeded from `rng_seed`.
    pub fn with_rng_seed(seed: Seed, rng_seed: u64) -> Self {
        Self::new(seed, ChaCha8Rng::seed_from_u64(rng_seed))
    }
}

impl<R: Rng> MutationEngine<R> {
    pub fn new(seed: Seed, rng: R) -> Self {
        Self { seed, rng }
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Strategy A. Uses no randomness, so it can be restarted at will.
    pub fn value_sweep(&self) -> ValueSweep<'_> {
        ValueSweep::new(self.seed.as_bytes())
    }

    /// Strategy B. Advances the engine's generator.
    pub fn random_corruption(&mut self, iterations: u64) -> RandomCorruption<'_, R> {
        RandomCorruption::new(self.seed.as_bytes(), &mut self.rng, iterations)
    }
}
