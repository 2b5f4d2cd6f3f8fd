//! In-process storage backend.

use super::backend::{StorageBackend, validate_key};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Keeps every key in a sorted map.
///
/// Used by tests and dry runs. Writes under a prefix registered with
/// [`MemoryStorage::fail_writes_under`] fail, which exercises the fatal
/// store-error path without touching the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: RwLock<Vec<String>>,
}

impl MemoryStorage {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write or delete under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: impl Into<String>) {
        if let Ok(mut prefixes) = self.failing_prefixes.write() {
            prefixes.push(prefix.into());
        }
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut prefixes) = self.failing_prefixes.write() {
            prefixes.clear();
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, operation: &str, key: &str) -> Result<()> {
        let prefixes = self
            .failing_prefixes
            .read()
            .map_err(|_| Error::operation(operation, "lock poisoned"))?;
        if prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return Err(Error::operation(operation, format!("{key}: injected failure")));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::operation("storage_read", "lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.check_writable("storage_write", key)?;
        self.entries
            .write()
            .map_err(|_| Error::operation("storage_write", "lock poisoned"))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::operation("storage_list", "lock poisoned"))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.check_writable("storage_delete", key)?;
        Ok(self
            .entries
            .write()
            .map_err(|_| Error::operation("storage_delete", "lock poisoned"))?
            .remove(key)
            .is_some())
    }
}
