//! Storage backend trait.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Byte-oriented key/value storage.
///
/// Backends are shared between the fingerprint stores, the checkpoint
/// manager and the writers, so every method takes `&self` and
/// implementations synchronise internally.
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`, `None` if absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `bytes` under `key`, replacing any previous value.
    ///
    /// The write is atomic: readers observe either the old or the new value,
    /// never a torn one.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Lists keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes `key`. Returns false if it did not exist.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Checks whether `key` exists.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key)?.is_some())
    }
}

/// Rejects empty keys, absolute keys and keys that escape the root.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unsafe keys.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(Error::InvalidInput(format!("invalid storage key: '{key}'")));
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(Error::InvalidInput(format!(
            "storage key has an empty or relative segment: '{key}'"
        )));
    }
    Ok(())
}

/// Reads and deserializes a JSON value.
///
/// # Errors
///
/// Returns the backend error, or [`Error::OperationFailed`] if the bytes are
/// not valid JSON for `T`.
pub fn read_json<T: DeserializeOwned>(
    storage: &dyn StorageBackend,
    key: &str,
) -> Result<Option<T>> {
    let Some(bytes) = storage.read(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::operation("deserialize", format!("{key}: {e}")))
}

/// Serializes a value as pretty JSON and writes it atomically.
///
/// # Errors
///
/// Returns the backend error or a serialization failure.
pub fn write_json<T: Serialize + ?Sized>(
    storage: &dyn StorageBackend,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| Error::operation("serialize", e))?;
    storage.write(key, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("checkpoints/run.json", true)]
    #[test_case("a", true)]
    #[test_case("", false)]
    #[test_case("/etc/passwd", false)]
    #[test_case("docs/../secret", false)]
    #[test_case("docs//shard", false)]
    #[test_case("docs\\shard", false)]
    fn test_validate_key(key: &str, ok: bool) {
        assert_eq!(validate_key(key).is_ok(), ok);
    }
}
