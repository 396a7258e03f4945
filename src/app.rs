use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::layer::LayerLoader;
use crate::layer::fetcher::HttpFetcher;
use crate::layer::host::{ConsoleNotifier, HostControl, RestartMode};
use crate::layer::loader::LoaderSettings;
use crate::layer::runtime::ProcessExecutor;
use crate::layer::store::LayerStore;
use crate::model::cache::CacheEntry;
use crate::model::config::AppConfig;
use crate::model::layer::{LayerConfig, LayerId};
use crate::store::FileStore;

/// Requested changes to one layer's settings. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub use_custom_url: Option<bool>,
    pub custom_url: Option<String>,
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Stop,
    Reload,
}

pub struct App {
    config: AppConfig,
    store: LayerStore,
    store_path: PathBuf,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let path = config.store_path();
        let kv = FileStore::open(&path)
            .with_context(|| format!("opening store {}", path.display()))?;
        let store_path = kv.path().to_path_buf();
        let store = LayerStore::new(Arc::new(kv), config.general.namespace.clone());

        Ok(Self {
            config,
            store,
            store_path,
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn loader(&self, assume_yes: bool) -> Result<LayerLoader> {
        let fetcher = HttpFetcher::new()?;

        Ok(LayerLoader::new(
            self.store.clone(),
            Arc::new(fetcher),
            Arc::new(ProcessExecutor::from_config(&self.config.runtime)),
            Arc::new(ConsoleNotifier::new(assume_yes)),
            Arc::new(ProcessHost::current()),
            LoaderSettings::from(&self.config.loader),
        ))
    }

    /// Host lifecycle: load on start, unload on Ctrl-C, force reload on SIGHUP.
    pub async fn run(&self, assume_yes: bool) -> Result<()> {
        let loader = self.loader(assume_yes)?;

        let summary = loader.load_all().await;
        if summary.is_empty() {
            println!("no layers enabled");
            return Ok(());
        }

        for (layer, result) in &summary.results {
            println!("{layer:<8} {result}");
        }
        println!(
            "running with {} resident layer(s); press Ctrl-C to unload",
            loader.loaded_layers().len()
        );

        match wait_for_shutdown().await? {
            Shutdown::Stop => {
                let unloaded = loader.unload_all().await;
                tracing::info!("stopped, {} layer(s) unloaded", unloaded.len());
            }
            Shutdown::Reload => loader.force_reload()?,
        }

        Ok(())
    }

    pub fn status(&self) -> Vec<String> {
        let now = chrono::Utc::now().timestamp_millis();

        LayerId::ALL
            .into_iter()
            .map(|layer| {
                let cache = self.store.cache(layer);
                let (state, url) = match self.store.config(layer) {
                    Ok(config) => (
                        if config.enabled { "enabled" } else { "disabled" },
                        config.effective_url(layer).to_string(),
                    ),
                    Err(err) => ("invalid", err.to_string()),
                };

                format!(
                    "{layer:<8} {state:<8} version {:<12} cache {:<12} {url}",
                    cache.version,
                    describe_cache(&cache, now),
                )
            })
            .collect()
    }

    pub fn configure(&self, layer: &str, update: ConfigUpdate) -> Result<LayerConfig> {
        let layer: LayerId = layer.parse()?;

        if update.reset {
            self.store.reset_config(layer)?;
        }
        let mut config = self.store.config(layer)?;
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        if let Some(use_custom_url) = update.use_custom_url {
            config.use_custom_url = use_custom_url;
        }
        if let Some(url) = update.custom_url {
            config.custom_url = Some(url);
        }

        self.store.set_config(layer, &config)?;
        tracing::info!("updated {layer} settings: {config:?}");
        Ok(config)
    }

    /// Reset the cache of one layer, or of all of them.
    pub fn clear_cache(&self, layer: Option<&str>) -> Result<Vec<LayerId>> {
        let layers = match layer {
            Some(name) => vec![name.parse::<LayerId>()?],
            None => LayerId::ALL.to_vec(),
        };

        for layer in &layers {
            self.store.clear_cache(*layer)?;
            tracing::info!("cleared {layer} cache");
        }

        Ok(layers)
    }

    /// Forget the load dialog and every cached payload.
    pub fn clear_stores(&self) -> Result<()> {
        self.store.set_shown_enabled_dialog(false)?;
        self.clear_cache(None)?;
        Ok(())
    }
}

fn describe_cache(cache: &CacheEntry, now_ms: i64) -> String {
    if cache.is_empty() {
        return "empty".to_string();
    }

    let secs = cache.age_ms(now_ms).max(0) / 1000;
    match secs {
        0..60 => format!("{secs}s old"),
        60..3600 => format!("{}m old", secs / 60),
        _ => format!("{}h old", secs / 3600),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<Shutdown> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok(Shutdown::Stop)
        }
        _ = hangup.recv() => Ok(Shutdown::Reload),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<Shutdown> {
    tokio::signal::ctrl_c().await?;
    Ok(Shutdown::Stop)
}

/// Restarts this binary. A clean restart launches nothing: the current
/// process exits once `run` returns and the unloaded layers stay off until the
/// next `run`. A reload launches a fresh copy with the same arguments.
struct ProcessHost {
    args: Vec<OsString>,
}

impl ProcessHost {
    fn current() -> Self {
        Self {
            args: std::env::args_os().skip(1).collect(),
        }
    }

    fn relaunch_args(&self, mode: RestartMode) -> Option<&[OsString]> {
        match mode {
            RestartMode::Clean => None,
            RestartMode::Reload => Some(&self.args),
        }
    }
}

impl HostControl for ProcessHost {
    fn restart(&self, mode: RestartMode) -> Result<()> {
        let Some(args) = self.relaunch_args(mode) else {
            tracing::info!("host stopping clean; layers stay unloaded until the next run");
            return Ok(());
        };

        let exe = std::env::current_exe()?;
        let child = std::process::Command::new(&exe)
            .args(args)
            .spawn()
            .with_context(|| format!("spawning {}", exe.display()))?;
        tracing::info!("restarted host as pid {}", child.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_in(dir: &Path) -> App {
        let config = AppConfig::from_toml_str(&format!(
            "[general]\ndata_dir = '{}'\n",
            dir.display()
        ))
        .unwrap();
        App::new(config).unwrap()
    }

    #[test]
    fn store_lives_in_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        assert_eq!(app.store_path(), dir.path().join("store.json"));
    }

    #[test]
    fn configure_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());

        let updated = app
            .configure(
                "vendetta",
                ConfigUpdate {
                    enabled: Some(true),
                    use_custom_url: Some(true),
                    custom_url: Some("http://localhost:4040/vendetta.js".to_string()),
                    reset: false,
                },
            )
            .unwrap();
        assert!(updated.enabled);
        drop(app);

        let reopened = app_in(dir.path());
        let rows = reopened.status();
        let vendetta = rows.iter().find(|row| row.starts_with("vendetta")).unwrap();
        assert!(vendetta.contains("enabled"));
        assert!(vendetta.ends_with("http://localhost:4040/vendetta.js"));
    }

    #[test]
    fn configure_reset_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        app.configure(
            "bunny",
            ConfigUpdate {
                enabled: Some(false),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();

        let reset = app
            .configure(
                "bunny",
                ConfigUpdate {
                    reset: true,
                    ..ConfigUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(reset, LayerId::Bunny.default_config());
    }

    #[test]
    fn configure_rejects_unknown_layers() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        assert!(app.configure("enmity", ConfigUpdate::default()).is_err());
    }

    #[test]
    fn clear_stores_resets_dialog_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let entry = CacheEntry::fetched("X".to_string(), 1, "1.0.0".to_string(), "u");
        app.store.replace_cache(LayerId::Revenge, &entry).unwrap();
        app.store.set_shown_enabled_dialog(true).unwrap();

        app.clear_stores().unwrap();

        assert!(!app.store.shown_enabled_dialog());
        assert!(app.store.cache(LayerId::Revenge).is_empty());
    }

    #[test]
    fn clear_cache_targets_one_layer() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());
        let entry = CacheEntry::fetched("X".to_string(), 1, "1.0.0".to_string(), "u");
        app.store.replace_cache(LayerId::Bunny, &entry).unwrap();
        app.store.replace_cache(LayerId::Revenge, &entry).unwrap();

        assert_eq!(app.clear_cache(Some("bunny")).unwrap(), vec![LayerId::Bunny]);
        assert!(app.store.cache(LayerId::Bunny).is_empty());
        assert!(!app.store.cache(LayerId::Revenge).is_empty());
    }

    #[test]
    fn cache_age_is_human_readable() {
        let now = 100 * 3_600_000;
        let entry = |age_ms: i64| {
            CacheEntry::fetched("X".to_string(), now - age_ms, "1".to_string(), "u")
        };

        assert_eq!(describe_cache(&CacheEntry::default(), now), "empty");
        assert_eq!(describe_cache(&entry(42_000), now), "42s old");
        assert_eq!(describe_cache(&entry(30 * 60_000), now), "30m old");
        assert_eq!(describe_cache(&entry(2 * 3_600_000), now), "2h old");
    }

    #[test]
    fn only_a_reload_relaunches_the_host() {
        let host = ProcessHost {
            args: vec![OsString::from("run"), OsString::from("--yes")],
        };

        assert_eq!(host.relaunch_args(RestartMode::Clean), None);
        assert_eq!(
            host.relaunch_args(RestartMode::Reload),
            Some(&[OsString::from("run"), OsString::from("--yes")][..])
        );
    }

    #[test]
    fn clean_restart_spawns_nothing() {
        // With no arguments a relaunch would start a bare `compat-loader`; a clean
        // restart must return before reaching the spawn.
        let host = ProcessHost { args: Vec::new() };
        host.restart(RestartMode::Clean).unwrap();
    }
}
