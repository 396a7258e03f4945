use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::layer::fetcher::{FetchError, Fetcher};
use crate::layer::host::{HostControl, Notifier, RestartChoice, RestartMode};
use crate::layer::registry::LayerRegistry;
use crate::layer::runtime::{ExecutionContext, ExecutionError, Executor};
use crate::layer::store::LayerStore;
use crate::layer::version::extract_version;
use crate::model::cache::{CacheEntry, UNKNOWN_VERSION};
use crate::model::config::LoaderConfig;
use crate::model::layer::{LayerConfig, LayerId, UnknownLayer};

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    pub freshness_window: Duration,
    pub fetch_timeout: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl From<&LoaderConfig> for LoaderSettings {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            freshness_window: Duration::from_secs(config.freshness_window_secs),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheReason {
    Fresh,
    StaleFallback,
}

impl fmt::Display for CacheReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheReason::Fresh => "fresh",
            CacheReason::StaleFallback => "stale-fallback",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no cached {layer} payload available and fetch failed: {cause}")]
    NoPayloadAvailable { layer: LayerId, cause: FetchError },

    #[error("failed to execute {layer} payload: {source}")]
    Execution {
        layer: LayerId,
        #[source]
        source: ExecutionError,
    },
}

impl From<UnknownLayer> for LoadError {
    fn from(err: UnknownLayer) -> Self {
        LoadError::Configuration(err.to_string())
    }
}

#[derive(Debug)]
pub enum LoadResult {
    Loaded(String),
    LoadedFromCache(CacheReason),
    Failed(LoadError),
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, LoadResult::Failed(_))
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadResult::Loaded(version) => write!(f, "loaded {version}"),
            LoadResult::LoadedFromCache(reason) => write!(f, "loaded from cache ({reason})"),
            LoadResult::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Outcome of one `load_all` pass, in layer order.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub results: Vec<(LayerId, LoadResult)>,
}

impl LoadSummary {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> Vec<LayerId> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_success())
            .map(|(layer, _)| *layer)
            .collect()
    }

    pub fn failed(&self) -> Vec<(LayerId, &LoadError)> {
        self.results
            .iter()
            .filter_map(|(layer, result)| match result {
                LoadResult::Failed(err) => Some((*layer, err)),
                _ => None,
            })
            .collect()
    }
}

/// A payload ready to run plus what to report if it runs cleanly.
struct Resolved {
    payload: String,
    version: String,
    result: LoadResult,
}

/// Fetches, caches and runs compatibility layers.
pub struct LayerLoader {
    store: LayerStore,
    fetcher: Arc<dyn Fetcher>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    host: Arc<dyn HostControl>,
    registry: LayerRegistry,
    settings: LoaderSettings,
}

impl LayerLoader {
    pub fn new(
        store: LayerStore,
        fetcher: Arc<dyn Fetcher>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        host: Arc<dyn HostControl>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            executor,
            notifier,
            host,
            registry: LayerRegistry::new(),
            settings,
        }
    }

    pub fn loaded_layers(&self) -> Vec<LayerId> {
        self.registry.loaded()
    }

    /// Load one layer by name. Unknown names fail with a configuration error.
    pub async fn load_layer(&self, layer_id: &str, config: &LayerConfig) -> LoadResult {
        match layer_id.parse::<LayerId>() {
            Ok(layer) => self.load(layer, config).await,
            Err(err) => {
                tracing::error!("refusing to load {layer_id:?}: {err}");
                LoadResult::Failed(err.into())
            }
        }
    }

    async fn load(&self, layer: LayerId, config: &LayerConfig) -> LoadResult {
        let resolved = match self.resolve(layer, config).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!("failed to load {layer}: {err}");
                return LoadResult::Failed(err);
            }
        };

        // Let the current turn finish before running payload code.
        tokio::task::yield_now().await;

        let context = ExecutionContext {
            layer,
            version: resolved.version,
        };
        match self.executor.execute(&resolved.payload, &context).await {
            Ok(handle) => {
                if let Some(handle) = handle {
                    if let Some(mut previous) = self.registry.register(layer, handle) {
                        if let Err(err) = previous.unload() {
                            tracing::warn!("failed to unload previous {layer} instance: {err:#}");
                        }
                    }
                }
                tracing::info!("successfully loaded {layer} ({})", resolved.result);
                resolved.result
            }
            Err(source) => {
                tracing::error!("failed to execute {layer} payload: {source}");
                LoadResult::Failed(LoadError::Execution { layer, source })
            }
        }
    }

    /// Pick the payload to run: fresh cache, new download, or stale fallback.
    async fn resolve(&self, layer: LayerId, config: &LayerConfig) -> Result<Resolved, LoadError> {
        let url = config.effective_url(layer);
        let cached = self.store.cache(layer);
        let now = now_ms();

        if cached.is_fresh_for(url, now, self.settings.freshness_window) {
            tracing::info!("using cached {layer} payload");
            return Ok(Resolved {
                payload: cached.payload.unwrap_or_default(),
                version: cached.version,
                result: LoadResult::LoadedFromCache(CacheReason::Fresh),
            });
        }

        tracing::info!("fetching fresh {layer} payload from {url}");
        match self.fetcher.fetch(url, self.settings.fetch_timeout).await {
            Ok(payload) => {
                let version =
                    extract_version(&payload).unwrap_or_else(|| UNKNOWN_VERSION.to_string());
                let entry = CacheEntry::fetched(payload.clone(), now_ms(), version.clone(), url);
                if let Err(err) = self.store.replace_cache(layer, &entry) {
                    tracing::warn!("failed to cache {layer} payload: {err}");
                }

                Ok(Resolved {
                    payload,
                    version: version.clone(),
                    result: LoadResult::Loaded(version),
                })
            }
            Err(cause) => match cached.payload {
                Some(payload) => {
                    tracing::warn!("failed to fetch {layer}, using cached version: {cause}");
                    Ok(Resolved {
                        payload,
                        version: cached.version,
                        result: LoadResult::LoadedFromCache(CacheReason::StaleFallback),
                    })
                }
                None => Err(LoadError::NoPayloadAvailable { layer, cause }),
            },
        }
    }

    /// Load every enabled layer side by side and report once.
    pub async fn load_all(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let mut pending = Vec::new();

        for layer in LayerId::ALL {
            match self.store.config(layer) {
                Ok(config) if config.enabled => {
                    pending.push(async move {
                        (layer, self.load_layer(layer.as_str(), &config).await)
                    });
                }
                Ok(_) => tracing::debug!("{layer} is disabled"),
                Err(err) => {
                    tracing::error!("failed to read {layer} settings: {err}");
                    summary.results.push((layer, LoadResult::Failed(err)));
                }
            }
        }

        summary.results.extend(join_all(pending).await);
        summary.results.sort_by_key(|(layer, _)| *layer);

        if !summary.is_empty() {
            self.notify_loaded(&summary).await;
        }

        summary
    }

    async fn notify_loaded(&self, summary: &LoadSummary) {
        if self.store.shown_enabled_dialog() {
            return;
        }

        if !self.notifier.layers_loaded(summary).await {
            tracing::debug!("load summary was not acknowledged");
            return;
        }

        if let Err(err) = self.store.set_shown_enabled_dialog(true) {
            tracing::warn!("failed to remember the load dialog: {err}");
        }
    }

    /// Unload every layer that left a handle behind and offer a restart.
    pub async fn unload_all(&self) -> Vec<LayerId> {
        let unloaded = self.unload_registered();

        if !unloaded.is_empty()
            && self.notifier.restart_required(&unloaded).await == RestartChoice::Now
        {
            if let Err(err) = self.host.restart(RestartMode::Clean) {
                tracing::error!("failed to restart host: {err:#}");
            }
        }

        unloaded
    }

    /// Unload everything and restart into a fresh load without asking.
    pub fn force_reload(&self) -> anyhow::Result<()> {
        let unloaded = self.unload_registered();
        tracing::info!("force reload after unloading {} layer(s)", unloaded.len());
        self.host.restart(RestartMode::Reload)
    }

    fn unload_registered(&self) -> Vec<LayerId> {
        let mut unloaded = Vec::new();

        for layer in LayerId::ALL {
            let Some(mut handle) = self.registry.take(layer) else {
                continue;
            };

            match handle.unload() {
                Ok(()) => {
                    tracing::info!("successfully unloaded {layer}");
                    unloaded.push(layer);
                }
                Err(err) => tracing::error!("error unloading {layer}: {err:#}"),
            }
        }

        unloaded
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
