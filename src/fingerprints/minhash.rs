//! MinHash signatures and LSH banding.

use super::simhash::stable_hash64;

/// Mersenne prime `2^61 - 1`, the modulus of every permutation.
pub const MERSENNE_61: u64 = (1u64 << 61) - 1;

/// Seed for the permutation coefficients. Changing it invalidates stored signatures.
const PERMUTATION_SEED: u64 = 0x5eed_c0de_2024_0001;

/// Deterministic generator for permutation coefficients.
struct SplitMix64(u64);

impl SplitMix64 {
    const fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

/// Computes MinHash signatures with a fixed family of permutations.
#[derive(Debug, Clone)]
pub struct MinHasher {
    shingle_size: usize,
    coefficients: Vec<(u64, u64)>,
}

impl MinHasher {
    /// Creates a hasher with `num_perm` permutations over `shingle_size`-character shingles.
    #[must_use]
    pub fn new(num_perm: usize, shingle_size: usize) -> Self {
        let mut rng = SplitMix64(PERMUTATION_SEED);
        let coefficients = (0..num_perm)
            .map(|_| {
                let a = rng.next() % (MERSENNE_61 - 1) + 1;
                let b = rng.next() % MERSENNE_61;
                (a, b)
            })
            .collect();
        Self {
            shingle_size: shingle_size.max(1),
            coefficients,
        }
    }

    /// Number of permutations.
    #[must_use]
    pub fn num_perm(&self) -> usize {
        self.coefficients.len()
    }

    /// Returns the signature of `text`, or `None` when the text has no shingles.
    #[must_use]
    pub fn signature(&self, text: &str) -> Option<Vec<u64>> {
        let shingles = shingle_hashes(text, self.shingle_size);
        if shingles.is_empty() {
            return None;
        }
        let signature = self
            .coefficients
            .iter()
            .map(|&(a, b)| {
                shingles
                    .iter()
                    .map(|&h| permute(a, b, h))
                    .min()
                    .unwrap_or(MERSENNE_61)
            })
            .collect();
        Some(signature)
    }
}

fn permute(a: u64, b: u64, h: u64) -> u64 {
    let value = (u128::from(a) * u128::from(h) + u128::from(b)) % u128::from(MERSENNE_61);
    // Always < 2^61, so the narrowing cannot truncate.
    #[allow(clippy::cast_possible_truncation)]
    let value = value as u64;
    value
}

/// Hashes of the distinct character shingles of the normalised text.
///
/// Text shorter than one shingle contributes a single shingle of the whole text.
fn shingle_hashes(text: &str, shingle_size: usize) -> Vec<u64> {
    let normalized = normalize_for_shingles(text);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let mut hashes: Vec<u64> = if chars.len() < shingle_size {
        vec![stable_hash64(normalized.as_bytes()) & MERSENNE_61]
    } else {
        chars
            .windows(shingle_size)
            .map(|window| {
                let shingle: String = window.iter().collect();
                stable_hash64(shingle.as_bytes()) & MERSENNE_61
            })
            .collect()
    };
    hashes.sort_unstable();
    hashes.dedup();
    hashes
}

/// Lower-cases and collapses whitespace runs to a single space.
#[must_use]
pub fn normalize_for_shingles(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hashes each LSH band of a signature. Returns `(band_index, band_hash)` pairs.
///
/// Trailing rows that do not fill a whole band are ignored.
#[must_use]
pub fn band_hashes(signature: &[u64], bands: usize) -> Vec<(u32, u64)> {
    if bands == 0 {
        return Vec::new();
    }
    let rows = signature.len() / bands;
    if rows == 0 {
        return Vec::new();
    }
    signature
        .chunks_exact(rows)
        .take(bands)
        .enumerate()
        .map(|(band, rows)| {
            let bytes: Vec<u8> = rows.iter().flat_map(|row| row.to_le_bytes()).collect();
            (u32::try_from(band).unwrap_or(u32::MAX), stable_hash64(&bytes))
        })
        .collect()
}

/// Estimates Jaccard similarity as the fraction of equal signature rows.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard_estimate(a: &[u64], b: &[u64]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let equal = a.iter().zip(b).filter(|(x, y)| x == y).count();
    equal as f64 / len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_across_instances() {
        let text = "Signatures must be stable between runs";
        let a = MinHasher::new(128, 5).signature(text);
        let b = MinHasher::new(128, 5).signature(text);
        assert_eq!(a, b);
        assert_eq!(a.map(|s| s.len()), Some(128));
    }

    #[test]
    fn test_whitespace_and_case_do_not_change_signature() {
        let hasher = MinHasher::new(64, 5);
        assert_eq!(
            hasher.signature("Hello   World\n again"),
            hasher.signature("hello world again")
        );
    }

    #[test]
    fn test_empty_text_has_no_signature() {
        let hasher = MinHasher::new(16, 5);
        assert!(hasher.signature("   \n\t").is_none());
        assert!(hasher.signature("abc").is_some());
    }

    #[test]
    fn test_jaccard_estimate() {
        assert!((jaccard_estimate(&[1, 2, 3, 4], &[1, 2, 3, 9]) - 0.75).abs() < f64::EPSILON);
        assert!(jaccard_estimate(&[], &[]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disjoint_texts_have_low_similarity() {
        let hasher = MinHasher::new(128, 5);
        let a = hasher.signature(&"the cat sat on the mat ".repeat(20)).unwrap_or_default();
        let b = hasher
            .signature(&"quantum flux capacitors hum loudly ".repeat(20))
            .unwrap_or_default();
        assert!(jaccard_estimate(&a, &b) < 0.2);
    }

    #[test]
    fn test_band_hashes_cover_full_bands() {
        let signature: Vec<u64> = (0..128).collect();
        let bands = band_hashes(&signature, 32);
        assert_eq!(bands.len(), 32);
        assert_eq!(bands[31].0, 31);
        assert!(band_hashes(&signature, 0).is_empty());
    }

    #[test]
    fn test_identical_rows_produce_identical_band_hashes() {
        let mut other: Vec<u64> = (0..128).collect();
        other[127] = 999;
        let a = band_hashes(&(0..128).collect::<Vec<_>>(), 32);
        let b = band_hashes(&other, 32);
        assert_eq!(a[..31], b[..31]);
        assert_ne!(a[31], b[31]);
    }
}
