//! Local filesystem storage backend.

use super::backend::{StorageBackend, validate_key};
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffix marking in-progress writes. Never listed.
const TEMP_SUFFIX: &str = ".partial";

/// Stores each key as a file below a root directory.
///
/// Writes go to a uniquely named temp file in the target directory which is
/// synced and renamed over the destination, so a crash mid-write leaves the
/// previous value intact.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Creates the backend, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::OperationFailed {
            operation: "create_storage_dir".to_string(),
            cause: format!("{}: {e}", root.display()),
        })?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }

    /// Directory holding every key that starts with `prefix`, if it exists.
    ///
    /// Keys never contain empty or relative segments, so a prefix whose
    /// directory part has one cannot match anything.
    fn list_root(&self, prefix: &str) -> Option<PathBuf> {
        let dir = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let mut path = self.root.clone();
        if !dir.is_empty() {
            for part in dir.split('/') {
                if part.is_empty() || part == "." || part == ".." {
                    return None;
                }
                path.push(part);
            }
        }
        path.is_dir().then_some(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

impl StorageBackend for LocalStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::operation("storage_read", format!("{key}: {e}"))),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .map_err(|e| Error::operation("storage_write", format!("{key}: {e}")))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("value");
        let temp_path = parent.join(format!(
            ".{file_name}.{}{TEMP_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::operation("storage_write", format!("{key}: {e}")));
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let Some(start) = self.list_root(prefix) else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = entry.map_err(|e| Error::operation("storage_list", e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Some(key) = self.key_for(entry.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::operation("storage_delete", format!("{key}: {e}"))),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}
