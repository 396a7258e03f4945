use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CACHE_CONTROL;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),
}

/// Time-bounded retrieval of payload text.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            response
                .text()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))
        };

        // Dropping the request future on timeout tears down the connection.
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("fetch of {url} abandoned after {timeout:?}");
                Err(FetchError::Timeout)
            }
        }
    }
}
