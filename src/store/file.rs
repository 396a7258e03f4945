use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use super::{KvStore, StoreError};

type Namespaces = BTreeMap<String, Map<String, Value>>;

/// JSON file store: `{ "<namespace>": { "<key>": <value> } }`.
///
/// The whole document is held in memory and rewritten through a temp file plus
/// rename on every batch, so the file on disk is always a complete snapshot.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<Namespaces>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let data = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Namespaces::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Namespaces::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!("opened store {}", path.display());

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &Namespaces) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer(&mut tmp, data)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;

        Ok(())
    }
}

impl KvStore for FileStore {
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
        let previous: Vec<(String, Option<Value>)> = entries
            .into_iter()
            .map(|(key, value)| {
                let old = table.insert(key.clone(), value);
                (key, old)
            })
            .collect();

        if let Err(err) = self.persist(&data) {
            // Keep memory in step with the file that is still on disk.
            let table = data.entry(namespace.to_string()).or_default();
            for (key, old) in previous {
                match old {
                    Some(value) => table.insert(key, value),
                    None => table.remove(&key),
                };
            }
            tracing::warn!("store write to {} failed: {err}", self.path.display());
            return Err(err);
        }

        Ok(())
    }
}
