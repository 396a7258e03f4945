use std::time::Duration;

/// Version recorded when a payload carries no recognisable version marker.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Cached payload state for one layer.
///
/// `payload == None` always comes with `fetched_at_ms == 0`; the store adapter
/// normalises anything else on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Option<String>,
    /// Epoch millis of the fetch that produced `payload` (0 = never).
    pub fetched_at_ms: i64,
    pub version: String,
    /// URL the payload was fetched from, when known.
    pub source_url: Option<String>,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            payload: None,
            fetched_at_ms: 0,
            version: UNKNOWN_VERSION.to_string(),
            source_url: None,
        }
    }
}

impl CacheEntry {
    pub fn fetched(
        payload: String,
        fetched_at_ms: i64,
        version: String,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            payload: Some(payload),
            fetched_at_ms,
            version,
            source_url: Some(source_url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at_ms)
    }

    /// Whether the cached payload can be used for `url` without touching the network.
    ///
    /// An entry recorded for a different URL is never fresh. Entries written
    /// before the source was tracked carry no URL and are taken at face value.
    pub fn is_fresh_for(&self, url: &str, now_ms: i64, window: Duration) -> bool {
        if self.payload.is_none() {
            return false;
        }

        if self
            .source_url
            .as_deref()
            .is_some_and(|source| source != url)
        {
            return false;
        }

        i128::from(self.age_ms(now_ms)) < window.as_millis() as i128
    }
}
