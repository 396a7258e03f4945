//! Namespaced key-value persistence shared by every layer.

pub mod file;
#[cfg(test)]
pub mod memory;

use std::path::PathBuf;

use serde_json::Value;

pub use file::FileStore;
#[cfg(test)]
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode store contents: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable `namespace/key -> JSON value` storage.
///
/// `set_many` applies all of its entries or none of them, and `get_many` reads
/// a consistent snapshot, so multi-key records never show up half-written.
pub trait KvStore: Send + Sync {
    fn get_many(&self, namespace: &str, keys: &[&str]) -> Vec<Option<Value>>;

    fn set_many(&self, namespace: &str, entries: Vec<(String, Value)>) -> Result<(), StoreError>;

    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.get_many(namespace, &[key]).pop().flatten()
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.set_many(namespace, vec![(key.to_string(), value)])
    }
}
