use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{KvStore, StoreError};

/// Volatile store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_many(&self, namespace: &str, keys: &[&str]) -> Vec<Option<Value>> {
        let data = self.data.lock();
        let table = data.get(namespace);
        keys.iter()
            .map(|key| table.and_then(|table| table.get(*key)).cloned())
            .collect()
    }

    fn set_many(&self, namespace: &str, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        let table = data.entry(namespace.to_string()).or_default();
        table.extend(entries);
        Ok(())
    }
}
