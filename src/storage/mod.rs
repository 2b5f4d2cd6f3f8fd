//! Storage layer.
//!
//! Everything persistent goes through one [`StorageBackend`]: the fingerprint
//! stores, checkpoints, shards, rejection logs and run manifests. Keys are
//! `/`-separated relative paths, so the same layout works on a local
//! directory or an object store.
//!
//! ```text
//! {fingerprint_root}/{version}/params.json
//! {fingerprint_root}/{version}/{simhash|minhash|chunk_hash}/{doc_id}.json
//! checkpoints/{run_id}.json
//! checkpoints/{run_id}/snapshots/{checkpoint_id}.json
//! docs/{source}/shard_{idx:05}.jsonl
//! rejections/{source}/part_{idx:05}.jsonl
//! manifests/{run_id}.json
//! ```

pub mod backend;
pub mod fingerprint;
pub mod local;
pub mod memory;

pub use backend::{StorageBackend, read_json, validate_key, write_json};
pub use fingerprint::{
    ChunkHashStore, FingerprintNamespace, FingerprintStore, LshBandKey, MinHashStore,
    RecordIndex, SimHashStore,
};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
