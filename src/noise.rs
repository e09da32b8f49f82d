//! Deterministic privacy noise, derived per retained n-gram
//!
//! Published frequencies are perturbed by `U * 0.01` with `U` uniform over
//! [-1, 1). The generator behind `U` is seeded from a digest of the n-gram's
//! tokens, the run's secret nonce, and the n-gram width, so identical inputs
//! always produce the identical noise sequence: reproducibility needs no
//! persisted randomness, while an observer without the nonce cannot cancel
//! the noise out.

use rand_xoshiro::rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoroshiro128Plus;
use sha2::{Digest, Sha256};

/// Scale of the relative perturbation applied to published frequencies
const NOISE_AMPLITUDE: f64 = 0.01;

/// Digest of an n-gram's tokens in order, the secret nonce, then the width as
/// a little-endian 8-byte integer
pub fn ngram_digest<'a>(
    tokens: impl IntoIterator<Item = &'a str>,
    nonce: &str,
    width: usize,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.as_bytes());
    }
    hasher.update(nonce.as_bytes());
    hasher.update((width as u64).to_le_bytes());
    hasher.finalize().into()
}

/// Map a generator draw to a double uniform over [-1, 1)
///
/// Keeps the top 53 bits and applies a fused multiply-add by 2^-52, which is
/// exactly `f64::EPSILON`.
fn symmetric_unit(draw: u64) -> f64 {
    ((draw >> 11) as f64).mul_add(f64::EPSILON, -1.0)
}

/// Per-n-gram noise generator
///
/// Lives for the whole run and advances once per flush of the owning n-gram,
/// so the noise varies month to month but is exactly reproducible given the
/// same corpus and nonce.
#[derive(Clone, Debug)]
pub struct NoiseSource(Xoroshiro128Plus);
//
impl NoiseSource {
    /// Derive the generator for one n-gram
    ///
    /// The seed is the first 8 digest bytes, little-endian; `seed_from_u64`
    /// expands it into the two-word generator state via SplitMix64.
    pub fn new<'a>(tokens: impl IntoIterator<Item = &'a str>, nonce: &str, width: usize) -> Self {
        let digest = ngram_digest(tokens, nonce, width);
        let seed = u64::from_le_bytes(digest[..8].try_into().expect("digest holds 32 bytes"));
        Self(Xoroshiro128Plus::seed_from_u64(seed))
    }

    /// Relative perturbation for the next flush, in [-0.01, 0.01)
    pub fn next_fraction(&mut self) -> f64 {
        symmetric_unit(self.0.next_u64()) * NOISE_AMPLITUDE
    }

    #[cfg(test)]
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
}
