use std::sync::Arc;

use serde_json::{Value, json};

use crate::layer::loader::LoadError;
use crate::model::cache::{CacheEntry, UNKNOWN_VERSION};
use crate::model::layer::{LayerConfig, LayerId};
use crate::store::{KvStore, StoreError};

const SHOWN_ENABLED_DIALOG: &str = "shownEnabledDialog";

/// Maps layer settings and cache entries onto the key-value store.
///
/// Keys: `{layer}Config`, `{layer}Code`, `{layer}Timestamp`, `{layer}Version`,
/// `{layer}Source`, plus the shared `shownEnabledDialog` flag.
#[derive(Clone)]
pub struct LayerStore {
    kv: Arc<dyn KvStore>,
    namespace: String,
}

impl LayerStore {
    pub fn new(kv: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }

    /// Stored settings for `layer`, or its defaults when nothing was stored.
    pub fn config(&self, layer: LayerId) -> Result<LayerConfig, LoadError> {
        match self.kv.get(&self.namespace, &key(layer, "Config")) {
            None | Some(Value::Null) => Ok(layer.default_config()),
            Some(raw) => serde_json::from_value(raw).map_err(|err| {
                LoadError::Configuration(format!("{layer}Config is malformed: {err}"))
            }),
        }
    }

    pub fn set_config(&self, layer: LayerId, config: &LayerConfig) -> Result<(), StoreError> {
        let value = serde_json::to_value(config)?;
        self.kv.set(&self.namespace, &key(layer, "Config"), value)
    }

    pub fn reset_config(&self, layer: LayerId) -> Result<(), StoreError> {
        self.set_config(layer, &layer.default_config())
    }

    pub fn cache(&self, layer: LayerId) -> CacheEntry {
        let keys = [
            key(layer, "Code"),
            key(layer, "Timestamp"),
            key(layer, "Version"),
            key(layer, "Source"),
        ];
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut values = self.kv.get_many(&self.namespace, &key_refs).into_iter();
        let mut next = || values.next().flatten();

        let payload = next()
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|payload| !payload.is_empty());
        let fetched_at_ms = next().and_then(|value| value.as_i64()).unwrap_or(0);
        let version = next()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        let source_url = next().and_then(|value| value.as_str().map(str::to_string));

        if payload.is_none() {
            return CacheEntry {
                version,
                ..CacheEntry::default()
            };
        }

        CacheEntry {
            payload,
            fetched_at_ms,
            version,
            source_url,
        }
    }

    /// Write every field of `entry` in one batch.
    pub fn replace_cache(&self, layer: LayerId, entry: &CacheEntry) -> Result<(), StoreError> {
        let entries = vec![
            (key(layer, "Code"), json!(entry.payload)),
            (key(layer, "Timestamp"), json!(entry.fetched_at_ms)),
            (key(layer, "Version"), json!(entry.version)),
            (key(layer, "Source"), json!(entry.source_url)),
        ];
        self.kv.set_many(&self.namespace, entries)
    }

    pub fn clear_cache(&self, layer: LayerId) -> Result<(), StoreError> {
        self.replace_cache(layer, &CacheEntry::default())
    }

    pub fn shown_enabled_dialog(&self) -> bool {
        self.kv
            .get(&self.namespace, SHOWN_ENABLED_DIALOG)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn set_shown_enabled_dialog(&self, shown: bool) -> Result<(), StoreError> {
        self.kv
            .set(&self.namespace, SHOWN_ENABLED_DIALOG, Value::Bool(shown))
    }
}

fn key(layer: LayerId, suffix: &str) -> String {
    format!("{}{suffix}", layer.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NS: &str = "VendettaCompat";

    fn store() -> (Arc<MemoryStore>, LayerStore) {
        let kv = Arc::new(MemoryStore::new());
        (kv.clone(), LayerStore::new(kv, NS))
    }

    #[test]
    fn missing_config_reads_as_defaults() {
        let (_, store) = store();
        assert_eq!(store.config(LayerId::Bunny).unwrap(), LayerId::Bunny.default_config());
        assert_eq!(
            store.config(LayerId::Revenge).unwrap(),
            LayerId::Revenge.default_config()
        );
    }

    #[test]
    fn malformed_config_is_a_configuration_error() {
        let (kv, store) = store();
        kv.set(NS, "vendettaConfig", json!({ "enabled": "yes please" }))
            .unwrap();

        let err = store.config(LayerId::Vendetta).unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn config_round_trips_through_the_namespaced_key() {
        let (kv, store) = store();
        let config = LayerConfig {
            enabled: true,
            use_custom_url: true,
            custom_url: Some("http://localhost:4040/revenge.js".to_string()),
        };
        store.set_config(LayerId::Revenge, &config).unwrap();

        assert_eq!(kv.get(NS, "revengeConfig").unwrap()["useCustomURL"], json!(true));
        assert_eq!(store.config(LayerId::Revenge).unwrap(), config);

        store.reset_config(LayerId::Revenge).unwrap();
        assert_eq!(
            store.config(LayerId::Revenge).unwrap(),
            LayerId::Revenge.default_config()
        );
    }

    #[test]
    fn cache_replacement_writes_all_fields() {
        let (kv, store) = store();
        let entry = CacheEntry::fetched(
            "payload".to_string(),
            1_000,
            "1.2.3".to_string(),
            "https://example.com/bunny.js",
        );
        store.replace_cache(LayerId::Bunny, &entry).unwrap();

        assert_eq!(kv.get(NS, "bunnyCode"), Some(json!("payload")));
        assert_eq!(kv.get(NS, "bunnyTimestamp"), Some(json!(1_000)));
        assert_eq!(kv.get(NS, "bunnyVersion"), Some(json!("1.2.3")));
        assert_eq!(store.cache(LayerId::Bunny), entry);
    }

    #[test]
    fn clear_cache_resets_every_field() {
        let (kv, store) = store();
        let entry = CacheEntry::fetched("payload".to_string(), 1_000, "1.2.3".to_string(), "u");
        store.replace_cache(LayerId::Bunny, &entry).unwrap();

        store.clear_cache(LayerId::Bunny).unwrap();

        assert_eq!(kv.get(NS, "bunnyCode"), Some(Value::Null));
        assert_eq!(store.cache(LayerId::Bunny), CacheEntry::default());
    }

    #[test]
    fn timestamp_without_payload_reads_as_never_fetched() {
        let (kv, store) = store();
        kv.set(NS, "bunnyTimestamp", json!(123_456)).unwrap();
        kv.set(NS, "bunnyCode", json!("")).unwrap();

        let entry = store.cache(LayerId::Bunny);
        assert!(entry.is_empty());
        assert_eq!(entry.fetched_at_ms, 0);
    }

    #[test]
    fn layers_do_not_share_cache_keys() {
        let (_, store) = store();
        let entry = CacheEntry::fetched("B".to_string(), 1, "1".to_string(), "u");
        store.replace_cache(LayerId::Bunny, &entry).unwrap();

        assert!(store.cache(LayerId::Vendetta).is_empty());
    }

    #[test]
    fn dialog_flag_defaults_to_false() {
        let (_, store) = store();
        assert!(!store.shown_enabled_dialog());
        store.set_shown_enabled_dialog(true).unwrap();
        assert!(store.shown_enabled_dialog());
    }
}
