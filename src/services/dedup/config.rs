//! Fingerprint configuration.

use crate::models::HashParams;
use crate::{Error, Result};

/// Configuration of the global fingerprint manager.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `CORPUSGATE_SIMHASH_MAX_HAMMING` | u32 | `3` | Max SimHash Hamming distance for a match |
/// | `CORPUSGATE_MINHASH_THRESHOLD` | f64 | `0.9` | Min estimated Jaccard for a match |
/// | `CORPUSGATE_FINGERPRINT_VERSION` | string | `v1` | Store namespace version |
/// | `CORPUSGATE_FINGERPRINT_ROOT` | string | `fingerprints` | Storage prefix of all namespaces |
///
/// # Example
///
/// ```rust
/// use corpusgate::FingerprintConfig;
///
/// let config = FingerprintConfig::default().with_simhash_max_hamming(5);
/// assert_eq!(config.simhash_max_hamming, 5);
/// assert!((config.minhash_threshold - 0.9).abs() < f64::EPSILON);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintConfig {
    /// Query and write the SimHash store.
    pub enable_simhash: bool,
    /// Query and write the MinHash/LSH store.
    pub enable_minhash: bool,
    /// Query and write the chunk-hash store.
    pub enable_chunk_hash: bool,
    /// A SimHash within this many bits is a full-document match.
    pub simhash_max_hamming: u32,
    /// A re-scored MinHash similarity at or above this is a full-document match.
    pub minhash_threshold: f64,
    /// Hash parameters frozen for the version namespace.
    pub params: HashParams,
    /// Storage prefix under which version namespaces live.
    pub root: String,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            enable_simhash: true,
            enable_minhash: true,
            enable_chunk_hash: true,
            simhash_max_hamming: 3,
            minhash_threshold: 0.9,
            params: HashParams::default(),
            root: "fingerprints".to_string(),
        }
    }
}

impl FingerprintConfig {
    /// Defaults overlaid with `CORPUSGATE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`; unparsable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(k) =
            lookup("CORPUSGATE_SIMHASH_MAX_HAMMING").and_then(|v| v.trim().parse().ok())
        {
            self.simhash_max_hamming = k;
        }
        if let Some(t) = lookup("CORPUSGATE_MINHASH_THRESHOLD").and_then(|v| v.trim().parse().ok())
        {
            self.minhash_threshold = t;
        }
        if let Some(version) =
            lookup("CORPUSGATE_FINGERPRINT_VERSION").filter(|v| !v.trim().is_empty())
        {
            self.params.fingerprint_version = version.trim().to_string();
        }
        if let Some(root) = lookup("CORPUSGATE_FINGERPRINT_ROOT").filter(|v| !v.trim().is_empty()) {
            self.root = root.trim().to_string();
        }
        self
    }

    /// Checks thresholds and hash parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let p = &self.params;
        if self.simhash_max_hamming > 64 {
            return Err(Error::Config(format!(
                "simhash_max_hamming must be at most 64, got {}",
                self.simhash_max_hamming
            )));
        }
        if !(self.minhash_threshold > 0.0 && self.minhash_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "minhash_threshold must be in (0, 1], got {}",
                self.minhash_threshold
            )));
        }
        if p.num_perm == 0 || p.bands == 0 || p.num_perm % p.bands != 0 {
            return Err(Error::Config(format!(
                "minhash_bands ({}) must divide minhash_num_perm ({})",
                p.bands, p.num_perm
            )));
        }
        if p.shingle_size == 0 {
            return Err(Error::Config("minhash_ngram must be positive".to_string()));
        }
        if p.chunk_size == 0 || p.chunk_overlap >= p.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than a positive chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }
        if p.fingerprint_version.trim().is_empty() {
            return Err(Error::Config("fingerprint_version must not be blank".to_string()));
        }
        Ok(())
    }

    /// Builder method to set the SimHash distance.
    #[must_use]
    pub const fn with_simhash_max_hamming(mut self, k: u32) -> Self {
        self.simhash_max_hamming = k;
        self
    }

    /// Builder method to set the MinHash threshold.
    #[must_use]
    pub const fn with_minhash_threshold(mut self, threshold: f64) -> Self {
        self.minhash_threshold = threshold;
        self
    }

    /// Builder method to enable or disable each store.
    #[must_use]
    pub const fn with_stores(mut self, simhash: bool, minhash: bool, chunk_hash: bool) -> Self {
        self.enable_simhash = simhash;
        self.enable_minhash = minhash;
        self.enable_chunk_hash = chunk_hash;
        self
    }

    /// Builder method to set the hash parameters.
    #[must_use]
    pub fn with_params(mut self, params: HashParams) -> Self {
        self.params = params;
        self
    }

    /// Builder method to set the storage root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }
}
