use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub loader: LoaderConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Store namespace all layer keys live under.
    pub namespace: String,
    pub log_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub freshness_window_secs: u64,
    pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub startup_grace_ms: u64,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    ///
    /// An explicit `path` must exist; the per-user file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let user_table = match path {
            Some(path) => Some(read_table(path)?),
            None => match default_config_path() {
                Some(path) if path.exists() => Some(read_table(&path)?),
                _ => None,
            },
        };

        Self::layered(user_table)
    }

    #[cfg(test)]
    pub fn from_toml_str(user: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(user)?;
        Self::layered(Some(table))
    }

    fn layered(user: Option<toml::Table>) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(DEFAULTS)?;
        if let Some(user) = user {
            merge_tables(&mut merged, user);
        }

        let mut config = toml::Value::Table(merged)
            .try_into::<AppConfig>()
            .context("invalid configuration")?;

        if let Some(dir) = config.general.data_dir.as_mut() {
            if dir.starts_with('~') {
                let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
                *dir = dir.replacen('~', &home.to_string_lossy(), 1);
            }
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = self.general.data_dir.as_ref() {
            return PathBuf::from(dir);
        }

        directories::ProjectDirs::from("", "", "compat-loader")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".compat-loader"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("store.json")
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "compat-loader")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Overlay `user` onto `base`, descending into tables so partial sections
/// keep the defaults they do not mention.
fn merge_tables(base: &mut toml::Table, user: toml::Table) {
    for (key, value) in user {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
