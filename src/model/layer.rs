use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The statically known compatibility layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerId {
    Bunny,
    Vendetta,
    Revenge,
}

impl LayerId {
    pub const ALL: [LayerId; 3] = [LayerId::Bunny, LayerId::Vendetta, LayerId::Revenge];

    /// Key prefix used in the store (`bunnyConfig`, `bunnyCode`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerId::Bunny => "bunny",
            LayerId::Vendetta => "vendetta",
            LayerId::Revenge => "revenge",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LayerId::Bunny => "Bunny",
            LayerId::Vendetta => "Vendetta",
            LayerId::Revenge => "Revenge",
        }
    }

    /// Compiled-in payload location used unless a custom URL is active.
    pub fn default_url(&self) -> &'static str {
        match self {
            LayerId::Bunny => "https://raw.githubusercontent.com/bunny-mod/builds/main/bunny.js",
            LayerId::Vendetta => {
                "https://github.com/vendetta-mod/builds/releases/latest/download/vendetta.js"
            }
            LayerId::Revenge => {
                "https://github.com/revenge-mod/revenge-builds/releases/latest/download/revenge.js"
            }
        }
    }

    /// Configuration used when nothing has been stored for this layer yet.
    /// Bunny stays enabled by default for installs that predate per-layer settings.
    pub fn default_config(&self) -> LayerConfig {
        match self {
            LayerId::Bunny => LayerConfig {
                enabled: true,
                use_custom_url: false,
                custom_url: Some("http://localhost:4040/bunny.js".to_string()),
            },
            LayerId::Vendetta | LayerId::Revenge => LayerConfig {
                enabled: false,
                use_custom_url: false,
                custom_url: Some(String::new()),
            },
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown layer: {0:?} (expected one of bunny, vendetta, revenge)")]
pub struct UnknownLayer(pub String);

impl FromStr for LayerId {
    type Err = UnknownLayer;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LayerId::ALL
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownLayer(value.to_string()))
    }
}

/// Per-layer settings, stored as JSON under `{layer}Config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "useCustomURL", default)]
    pub use_custom_url: bool,
    #[serde(rename = "customURL", default)]
    pub custom_url: Option<String>,
}

impl LayerConfig {
    /// The custom URL wins only while it is switched on and non-empty.
    pub fn effective_url<'a>(&'a self, layer: LayerId) -> &'a str {
        match self.custom_url.as_deref().map(str::trim) {
            Some(url) if self.use_custom_url && !url.is_empty() => url,
            _ => layer.default_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_layers_case_insensitively() {
        assert_eq!("bunny".parse::<LayerId>(), Ok(LayerId::Bunny));
        assert_eq!("Vendetta".parse::<LayerId>(), Ok(LayerId::Vendetta));
        assert_eq!(" revenge ".parse::<LayerId>(), Ok(LayerId::Revenge));
    }

    #[test]
    fn rejects_unknown_layer() {
        let err = "enmity".parse::<LayerId>().unwrap_err();
        assert_eq!(err, UnknownLayer("enmity".to_string()));
        assert!(err.to_string().contains("enmity"));
    }

    #[test]
    fn effective_url_ignores_custom_url_when_switched_off() {
        let config = LayerConfig {
            enabled: true,
            use_custom_url: false,
            custom_url: Some("http://localhost:4040/bunny.js".to_string()),
        };
        assert_eq!(
            config.effective_url(LayerId::Bunny),
            LayerId::Bunny.default_url()
        );
    }

    #[test]
    fn effective_url_uses_custom_url_when_switched_on() {
        let config = LayerConfig {
            enabled: true,
            use_custom_url: true,
            custom_url: Some("http://localhost:4040/bunny.js".to_string()),
        };
        assert_eq!(
            config.effective_url(LayerId::Bunny),
            "http://localhost:4040/bunny.js"
        );
    }

    #[test]
    fn effective_url_falls_back_on_blank_custom_url() {
        let config = LayerConfig {
            enabled: true,
            use_custom_url: true,
            custom_url: Some("   ".to_string()),
        };
        assert_eq!(
            config.effective_url(LayerId::Revenge),
            LayerId::Revenge.default_url()
        );
    }

    #[test]
    fn config_reads_the_stored_json_shape() {
        let raw = r#"{"enabled":true,"useCustomURL":true,"customURL":"http://x/v.js","lastLoaded":0,"version":"unknown"}"#;
        let config: LayerConfig = serde_json::from_str(raw).unwrap();
        assert!(config.enabled);
        assert!(config.use_custom_url);
        assert_eq!(config.custom_url.as_deref(), Some("http://x/v.js"));

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["useCustomURL"], serde_json::json!(true));
        assert_eq!(written["customURL"], serde_json::json!("http://x/v.js"));
    }

    #[test]
    fn only_bunny_is_enabled_by_default() {
        assert!(LayerId::Bunny.default_config().enabled);
        assert!(!LayerId::Vendetta.default_config().enabled);
        assert!(!LayerId::Revenge.default_config().enabled);
    }
}
