//! Global fingerprint stores.
//!
//! Three content-addressed stores share one [`RecordIndex`] implementation and
//! differ only in their key:
//!
//! | Store | Key | Lookup |
//! |-------|-----|--------|
//! | [`SimHashStore`] | `u64` signature | exact or Hamming ≤ k |
//! | [`MinHashStore`] | [`LshBandKey`] | union across bands |
//! | [`ChunkHashStore`] | hex digest | exact |
//!
//! Mutations are applied in memory immediately and persisted per document on
//! [`FingerprintStore::flush`]. Until then they are journaled and can be
//! undone with [`FingerprintStore::rollback`], which lets the runner keep the
//! stores in step with the shards it has actually written.

mod chunk;
mod minhash;
mod simhash;

pub use chunk::ChunkHashStore;
pub use minhash::{LshBandKey, MinHashStore};
pub use simhash::SimHashStore;

use super::backend::{StorageBackend, read_json, write_json};
use crate::models::{
    DocId, FingerprintId, FingerprintRecord, FingerprintType, FingerprintValue, HashParams,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Common operations of the three fingerprint stores.
///
/// Every method has a default that delegates to the store's [`RecordIndex`].
pub trait FingerprintStore: Send + Sync {
    /// Lookup key of this store.
    type Key: Eq + Hash + Clone + Send + Sync;

    /// Returns the underlying index.
    fn index(&self) -> &RecordIndex<Self::Key>;

    /// Fingerprint type held by the store.
    fn fingerprint_type(&self) -> FingerprintType {
        self.index().fingerprint_type()
    }

    /// Records stored under exactly `key`.
    fn query(&self, key: &Self::Key) -> Result<Vec<FingerprintRecord>> {
        self.index().query(key)
    }

    /// Adds a record.
    fn add(&self, record: FingerprintRecord) -> Result<()> {
        self.index().add(record)
    }

    /// Removes a record. Returns false if it was not present.
    fn remove(&self, fingerprint_id: &FingerprintId) -> Result<bool> {
        self.index().remove(fingerprint_id)
    }

    /// Records belonging to a document.
    fn records_for_doc(&self, doc_id: &DocId) -> Result<Vec<FingerprintRecord>> {
        self.index().records_for_doc(doc_id)
    }

    /// Removes every record of a document. Returns the number removed.
    fn remove_doc(&self, doc_id: &DocId) -> Result<usize> {
        let mut removed = 0;
        for record in self.records_for_doc(doc_id)? {
            if self.remove(&record.fingerprint_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Persists pending mutations.
    fn flush(&self) -> Result<()> {
        self.index().flush()
    }

    /// Undoes mutations made since the last flush.
    fn rollback(&self) -> Result<()> {
        self.index().rollback()
    }

    /// Number of records.
    fn len(&self) -> Result<usize> {
        self.index().len()
    }

    /// Returns true when the store holds no records.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Version namespace shared by the three stores.
///
/// Pins the hash parameters of a `fingerprint_version` in `params.json` on
/// first use; later opens with different parameters are refused.
#[derive(Clone)]
pub struct FingerprintNamespace {
    storage: Arc<dyn StorageBackend>,
    root: String,
    params: HashParams,
}

impl FingerprintNamespace {
    /// Opens (or initialises) the namespace `{root}/{version}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the stored parameters differ from
    /// `params`, or [`Error::FingerprintStore`] on I/O failure.
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        root: impl Into<String>,
        params: HashParams,
    ) -> Result<Self> {
        let root = root.into().trim_matches('/').to_string();
        if params.fingerprint_version.trim().is_empty()
            || params.fingerprint_version.contains('/')
        {
            return Err(Error::Config(format!(
                "invalid fingerprint_version '{}'",
                params.fingerprint_version
            )));
        }
        let namespace = Self {
            storage,
            root,
            params,
        };
        let key = namespace.params_key();
        match read_json::<HashParams>(namespace.storage.as_ref(), &key)
            .map_err(|e| Error::store("open_namespace", e))?
        {
            Some(stored) if stored != namespace.params => {
                return Err(Error::Config(format!(
                    "fingerprint version '{}' was created with different hash parameters; \
                     bump fingerprint_version or rebuild the stores",
                    namespace.params.fingerprint_version
                )));
            },
            Some(_) => {},
            None => write_json(namespace.storage.as_ref(), &key, &namespace.params)
                .map_err(|e| Error::store("open_namespace", e))?,
        }
        Ok(namespace)
    }

    /// Returns the frozen hash parameters.
    #[must_use]
    pub const fn params(&self) -> &HashParams {
        &self.params
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.storage)
    }

    /// Storage prefix of one store.
    #[must_use]
    pub fn store_prefix(&self, fingerprint_type: FingerprintType) -> String {
        self.join(&format!(
            "{}/{}",
            self.params.fingerprint_version,
            fingerprint_type.as_str()
        ))
    }

    fn params_key(&self) -> String {
        self.join(&format!("{}/params.json", self.params.fingerprint_version))
    }

    fn join(&self, rest: &str) -> String {
        if self.root.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{rest}", self.root)
        }
    }
}

/// On-disk form of one document's records in one store.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocFingerprints {
    doc_id: DocId,
    records: Vec<FingerprintRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<Vec<u64>>,
}

#[derive(Debug)]
enum JournalEntry {
    Added(FingerprintId),
    Removed(FingerprintRecord),
    Signature {
        doc_id: DocId,
        previous: Option<Vec<u64>>,
    },
}

#[derive(Debug)]
struct IndexState<K> {
    by_key: HashMap<K, Vec<FingerprintId>>,
    records: HashMap<FingerprintId, FingerprintRecord>,
    by_doc: HashMap<DocId, Vec<FingerprintId>>,
    signatures: HashMap<DocId, Vec<u64>>,
    dirty: BTreeSet<DocId>,
    journal: Vec<JournalEntry>,
}

impl<K> Default for IndexState<K> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            records: HashMap::new(),
            by_doc: HashMap::new(),
            signatures: HashMap::new(),
            dirty: BTreeSet::new(),
            journal: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> IndexState<K> {
    fn insert(&mut self, key: K, record: FingerprintRecord) {
        let id = record.fingerprint_id.clone();
        self.by_key.entry(key).or_default().push(id.clone());
        self.by_doc
            .entry(record.doc_id.clone())
            .or_default()
            .push(id.clone());
        self.records.insert(id, record);
    }

    fn take(
        &mut self,
        id: &FingerprintId,
        key_of: fn(&FingerprintValue) -> Option<K>,
    ) -> Option<FingerprintRecord> {
        let record = self.records.remove(id)?;
        if let Some(key) = key_of(&record.value) {
            detach(&mut self.by_key, &key, id);
        }
        detach(&mut self.by_doc, &record.doc_id, id);
        Some(record)
    }
}

fn detach<Q: Eq + Hash + Clone>(
    map: &mut HashMap<Q, Vec<FingerprintId>>,
    key: &Q,
    id: &FingerprintId,
) {
    if let Some(ids) = map.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

/// Shared in-memory index with deferred per-document persistence.
pub struct RecordIndex<K> {
    fingerprint_type: FingerprintType,
    fingerprint_version: String,
    key_of: fn(&FingerprintValue) -> Option<K>,
    storage: Option<(Arc<dyn StorageBackend>, String)>,
    state: RwLock<IndexState<K>>,
}

impl<K: Eq + Hash + Clone + Send + Sync> RecordIndex<K> {
    /// Creates an index that is never persisted.
    #[must_use]
    pub fn in_memory(
        fingerprint_type: FingerprintType,
        fingerprint_version: impl Into<String>,
        key_of: fn(&FingerprintValue) -> Option<K>,
    ) -> Self {
        Self {
            fingerprint_type,
            fingerprint_version: fingerprint_version.into(),
            key_of,
            storage: None,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Opens an index persisted in `namespace`, loading existing records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FingerprintStore`] if stored records cannot be read,
    /// or [`Error::Config`] if any belong to a different version.
    pub fn open(
        namespace: &FingerprintNamespace,
        fingerprint_type: FingerprintType,
        key_of: fn(&FingerprintValue) -> Option<K>,
    ) -> Result<Self> {
        let storage = namespace.storage();
        let prefix = namespace.store_prefix(fingerprint_type);
        let version = namespace.params().fingerprint_version.clone();
        let mut state = IndexState::default();

        let keys = storage
            .list(&format!("{prefix}/"))
            .map_err(|e| Error::store("load", e))?;
        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            let Some(stored) = read_json::<StoredDocFingerprints>(storage.as_ref(), key)
                .map_err(|e| Error::store("load", e))?
            else {
                continue;
            };
            for record in stored.records {
                if record.fingerprint_version != version {
                    return Err(Error::Config(format!(
                        "record {} in '{key}' has version '{}', expected '{version}'",
                        record.fingerprint_id, record.fingerprint_version
                    )));
                }
                let record_key = key_of(&record.value).ok_or_else(|| {
                    Error::store("load", format!("'{key}' holds a foreign fingerprint type"))
                })?;
                state.insert(record_key, record);
            }
            if let Some(signature) = stored.signature {
                state.signatures.insert(stored.doc_id, signature);
            }
        }
        debug!(
            store = fingerprint_type.as_str(),
            records = state.records.len(),
            "Loaded fingerprint store"
        );

        Ok(Self {
            fingerprint_type,
            fingerprint_version: version,
            key_of,
            storage: Some((storage, prefix)),
            state: RwLock::new(state),
        })
    }

    /// Fingerprint type of the records.
    #[must_use]
    pub const fn fingerprint_type(&self) -> FingerprintType {
        self.fingerprint_type
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, IndexState<K>>> {
        self.state
            .read()
            .map_err(|_| Error::store(operation, "index lock poisoned"))
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, IndexState<K>>> {
        self.state
            .write()
            .map_err(|_| Error::store(operation, "index lock poisoned"))
    }

    /// Records stored under exactly `key`.
    pub fn query(&self, key: &K) -> Result<Vec<FingerprintRecord>> {
        let state = self.read("query")?;
        Ok(state
            .by_key
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    /// Records whose key satisfies `accept`, scanning every key.
    pub fn scan(&self, mut accept: impl FnMut(&K) -> bool) -> Result<Vec<FingerprintRecord>> {
        let state = self.read("scan")?;
        Ok(state
            .by_key
            .iter()
            .filter(|(key, _)| accept(key))
            .flat_map(|(_, ids)| ids.iter().filter_map(|id| state.records.get(id).cloned()))
            .collect())
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> Result<usize> {
        Ok(self.read("key_count")?.by_key.len())
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a record of another version and
    /// [`Error::FingerprintStore`] for a record of another type.
    pub fn add(&self, record: FingerprintRecord) -> Result<()> {
        if record.fingerprint_version != self.fingerprint_version {
            return Err(Error::Config(format!(
                "cannot add a '{}' record to the '{}' store namespace",
                record.fingerprint_version, self.fingerprint_version
            )));
        }
        let key = (self.key_of)(&record.value)
            .filter(|_| record.fingerprint_type == self.fingerprint_type)
            .ok_or_else(|| {
                Error::store(
                    "add",
                    format!(
                        "{} record offered to the {} store",
                        record.fingerprint_type, self.fingerprint_type
                    ),
                )
            })?;
        let mut state = self.write("add")?;
        state.dirty.insert(record.doc_id.clone());
        state
            .journal
            .push(JournalEntry::Added(record.fingerprint_id.clone()));
        state.insert(key, record);
        Ok(())
    }

    /// Removes a record.
    pub fn remove(&self, fingerprint_id: &FingerprintId) -> Result<bool> {
        let mut state = self.write("remove")?;
        let Some(record) = state.take(fingerprint_id, self.key_of) else {
            return Ok(false);
        };
        state.dirty.insert(record.doc_id.clone());
        state.journal.push(JournalEntry::Removed(record));
        Ok(true)
    }

    /// Records belonging to a document.
    pub fn records_for_doc(&self, doc_id: &DocId) -> Result<Vec<FingerprintRecord>> {
        let state = self.read("records_for_doc")?;
        Ok(state
            .by_doc
            .get(doc_id)
            .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    /// Stores or clears a per-document signature.
    pub fn set_signature(&self, doc_id: &DocId, signature: Option<Vec<u64>>) -> Result<()> {
        let mut state = self.write("set_signature")?;
        let previous = match signature {
            Some(signature) => state.signatures.insert(doc_id.clone(), signature),
            None => state.signatures.remove(doc_id),
        };
        state.dirty.insert(doc_id.clone());
        state.journal.push(JournalEntry::Signature {
            doc_id: doc_id.clone(),
            previous,
        });
        Ok(())
    }

    /// Returns a document's signature.
    pub fn signature(&self, doc_id: &DocId) -> Result<Option<Vec<u64>>> {
        Ok(self.read("signature")?.signatures.get(doc_id).cloned())
    }

    /// Number of records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read("len")?.records.len())
    }

    /// Returns true when no records are held.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of documents with unflushed changes.
    pub fn pending_docs(&self) -> Result<usize> {
        Ok(self.read("pending_docs")?.dirty.len())
    }

    /// Writes every changed document and clears the journal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FingerprintStore`] on the first failed write. Documents
    /// not yet written stay pending.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.write("flush")?;
        let Some((storage, prefix)) = &self.storage else {
            state.dirty.clear();
            state.journal.clear();
            return Ok(());
        };
        while let Some(doc_id) = state.dirty.first().cloned() {
            let key = format!("{prefix}/{}.json", doc_file_stem(&doc_id));
            let records: Vec<FingerprintRecord> = state
                .by_doc
                .get(&doc_id)
                .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
                .unwrap_or_default();
            let signature = state.signatures.get(&doc_id).cloned();
            if records.is_empty() && signature.is_none() {
                storage
                    .delete(&key)
                    .map_err(|e| Error::store("flush", e))?;
            } else {
                let stored = StoredDocFingerprints {
                    doc_id: doc_id.clone(),
                    records,
                    signature,
                };
                write_json(storage.as_ref(), &key, &stored).map_err(|e| Error::store("flush", e))?;
            }
            state.dirty.remove(&doc_id);
        }
        state.journal.clear();
        Ok(())
    }

    /// Reverts every mutation since the last flush.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.write("rollback")?;
        let journal = std::mem::take(&mut state.journal);
        let undone = journal.len();
        for entry in journal.into_iter().rev() {
            match entry {
                JournalEntry::Added(id) => {
                    state.take(&id, self.key_of);
                },
                JournalEntry::Removed(record) => {
                    if let Some(key) = (self.key_of)(&record.value) {
                        state.insert(key, record);
                    }
                },
                JournalEntry::Signature { doc_id, previous } => {
                    match previous {
                        Some(signature) => state.signatures.insert(doc_id, signature),
                        None => state.signatures.remove(&doc_id),
                    };
                },
            }
        }
        state.dirty.clear();
        if undone > 0 {
            debug!(store = self.fingerprint_type.as_str(), undone, "Rolled back fingerprint store");
        }
        Ok(())
    }
}

/// File name for a document; ids that are not plain tokens are hashed.
fn doc_file_stem(doc_id: &DocId) -> String {
    let id = doc_id.as_str();
    let safe = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        id.to_string()
    } else {
        hex::encode(Sha256::digest(id.as_bytes()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn record(doc: &str, value: u64) -> FingerprintRecord {
        FingerprintRecord::new(
            FingerprintValue::SimHash { value },
            DocId::new(doc),
            "wiki-en",
            "wiki",
            &HashParams::default(),
        )
    }

    fn simhash_key(value: &FingerprintValue) -> Option<u64> {
        match value {
            FingerprintValue::SimHash { value } => Some(*value),
            _ => None,
        }
    }

    #[test]
    fn test_namespace_rejects_changed_params() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        FingerprintNamespace::open(Arc::clone(&storage), "fp", HashParams::default()).unwrap();
        let changed = HashParams {
            num_perm: 64,
            ..HashParams::default()
        };
        let result = FingerprintNamespace::open(Arc::clone(&storage), "fp", changed.clone());
        assert!(matches!(result, Err(Error::Config(_))));

        let bumped = HashParams {
            fingerprint_version: "v2".into(),
            ..changed
        };
        assert!(FingerprintNamespace::open(storage, "fp", bumped).is_ok());
    }

    #[test]
    fn test_flush_persists_and_reload_restores() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let ns =
            FingerprintNamespace::open(Arc::clone(&storage), "fp", HashParams::default()).unwrap();
        let index = RecordIndex::open(&ns, FingerprintType::SimHash, simhash_key).unwrap();
        index.add(record("d1", 7)).unwrap();
        index.add(record("d2", 7)).unwrap();
        assert_eq!(index.pending_docs().unwrap(), 2);
        index.flush().unwrap();
        assert_eq!(index.pending_docs().unwrap(), 0);
        assert_eq!(storage.list("fp/v1/simhash/").unwrap().len(), 2);

        let reopened = RecordIndex::open(&ns, FingerprintType::SimHash, simhash_key).unwrap();
        assert_eq!(reopened.query(&7).unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_undoes_unflushed_changes() {
        let index = RecordIndex::in_memory(FingerprintType::SimHash, "v1", simhash_key);
        let kept = record("d1", 1);
        index.add(kept.clone()).unwrap();
        index.flush().unwrap();

        index.add(record("d2", 2)).unwrap();
        index.remove(&kept.fingerprint_id).unwrap();
        index.set_signature(&DocId::new("d2"), Some(vec![1, 2])).unwrap();
        index.rollback().unwrap();

        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.query(&1).unwrap().len(), 1);
        assert!(index.query(&2).unwrap().is_empty());
        assert!(index.signature(&DocId::new("d2")).unwrap().is_none());
    }

    #[test]
    fn test_removing_last_record_deletes_file() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let ns =
            FingerprintNamespace::open(Arc::clone(&storage), "", HashParams::default()).unwrap();
        let index = RecordIndex::open(&ns, FingerprintType::SimHash, simhash_key).unwrap();
        let r = record("d1", 3);
        index.add(r.clone()).unwrap();
        index.flush().unwrap();
        assert!(storage.exists("v1/simhash/d1.json").unwrap());

        index.remove(&r.fingerprint_id).unwrap();
        index.flush().unwrap();
        assert!(!storage.exists("v1/simhash/d1.json").unwrap());
    }

    #[test]
    fn test_add_rejects_foreign_version_and_type() {
        let index = RecordIndex::in_memory(FingerprintType::SimHash, "v2", simhash_key);
        assert!(matches!(index.add(record("d1", 1)), Err(Error::Config(_))));

        let index = RecordIndex::in_memory(FingerprintType::SimHash, "v1", simhash_key);
        let chunk = FingerprintRecord::new(
            FingerprintValue::ChunkHash { hash: "ab".into() },
            DocId::new("d1"),
            "s",
            "t",
            &HashParams::default(),
        );
        assert!(matches!(index.add(chunk), Err(Error::FingerprintStore { .. })));
    }

    #[test]
    fn test_unsafe_doc_ids_are_hashed() {
        assert_eq!(doc_file_stem(&DocId::new("abc-1_2")), "abc-1_2");
        assert_eq!(doc_file_stem(&DocId::new("../x")).len(), 64);
    }
}
