//! 64-bit SimHash over word tokens.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Signature width in bits.
pub const SIMHASH_BITS: u32 = 64;

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)] // Static pattern, validated by tests
    Regex::new(r"[A-Za-z0-9_]{2,}").expect("static regex")
});

/// Stable 64-bit hash of a token (first 8 bytes of SHA-256).
///
/// Fingerprints persist across runs, so the hash must not depend on a
/// per-process seed.
#[must_use]
pub fn stable_hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

/// Computes the SimHash of `text` from its first `max_tokens` lower-cased tokens.
///
/// # Example
///
/// ```rust
/// use corpusgate::fingerprints::simhash::{hamming_distance, simhash64};
///
/// let a = simhash64("The quick brown fox jumps", 2000);
/// let b = simhash64("the   QUICK brown fox jumps", 2000);
/// assert_eq!(hamming_distance(a, b), 0);
/// ```
#[must_use]
pub fn simhash64(text: &str, max_tokens: usize) -> u64 {
    let lowered = text.to_lowercase();
    let mut weights = [0i64; SIMHASH_BITS as usize];
    for token in TOKEN_PATTERN
        .find_iter(&lowered)
        .take(max_tokens)
        .map(|m| m.as_str())
    {
        let hash = stable_hash64(token.as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if (hash >> bit) & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }
    weights
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

/// Number of differing bits between two signatures.
#[must_use]
pub const fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Number of 64-bit values within Hamming distance `k` of any given value.
#[must_use]
pub fn neighbourhood_size(k: u32) -> u128 {
    let n = u128::from(SIMHASH_BITS);
    let mut total = 0u128;
    let mut binom = 1u128;
    for i in 0..=u128::from(k.min(SIMHASH_BITS)) {
        if i > 0 {
            binom = binom * (n - i + 1) / i;
        }
        total += binom;
    }
    total
}

/// Calls `visit` for every value within Hamming distance `k` of `value`.
///
/// Stops early when `visit` returns `false`.
pub fn for_each_within(value: u64, k: u32, visit: &mut impl FnMut(u64) -> bool) {
    fn expand(
        value: u64,
        from_bit: u32,
        remaining: u32,
        visit: &mut impl FnMut(u64) -> bool,
    ) -> bool {
        if !visit(value) {
            return false;
        }
        if remaining == 0 {
            return true;
        }
        for bit in from_bit..SIMHASH_BITS {
            if !expand(value ^ (1u64 << bit), bit + 1, remaining - 1, visit) {
                return false;
            }
        }
        true
    }
    expand(value, 0, k.min(SIMHASH_BITS), visit);
}
