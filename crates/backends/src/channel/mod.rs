//! Broadcast-channel search client.
//!
//! Searches the public web preview of a broadcast channel
//! (`https://t.me/s/<channel>?q=<keyword>`) and normalizes matching
//! messages into search results. One client instance serves every
//! channel; a politeness interval spaces consecutive requests.

pub mod parse;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use fansearch_core::SearchResult;
use fansearch_engine::backend::{BackendError, ChannelSearch};

use crate::http::HttpConfig;

/// Default base URL for channel previews.
const DEFAULT_BASE_URL: &str = "https://t.me/s";

/// Minimum interval between preview requests.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

/// Errors from the channel preview client.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpStatus { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { ChannelError::Timeout } else { ChannelError::Network(Arc::new(err)) }
    }
}

impl From<ChannelError> for BackendError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout => BackendError::Timeout,
            other => BackendError::Http(other.to_string()),
        }
    }
}

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now)),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// Channel preview client configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base URL (default: https://t.me/s).
    pub base_url: String,
    /// Shared HTTP settings.
    pub http: HttpConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string(), http: HttpConfig::default() }
    }
}

/// Broadcast-channel search client.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    http: reqwest::Client,
    config: ChannelConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl ChannelClient {
    /// Create a new channel client with the given configuration.
    pub fn new(config: ChannelConfig) -> Result<Self, ChannelError> {
        let http = config.http.build_client().map_err(|e| ChannelError::Network(Arc::new(e)))?;
        Ok(Self { http, config, rate_limiter: Arc::new(RateLimiter::new(MIN_REQUEST_INTERVAL)) })
    }

    async fn fetch_preview(&self, channel: &str, keyword: &str) -> Result<String, ChannelError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/{}", self.config.base_url, channel);
        tracing::debug!(channel, keyword, "fetching channel preview");

        let response = self.http.get(&url).query(&[("q", keyword)]).send().await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ChannelError::HttpStatus { status: status.as_u16() });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ChannelSearch for ChannelClient {
    async fn search(&self, channel: &str, keyword: &str) -> Result<Vec<SearchResult>, BackendError> {
        let html = self.fetch_preview(channel, keyword).await?;
        let results = parse::parse_channel_page(&html, channel);
        tracing::debug!(channel, count = results.len(), "channel preview parsed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.base_url, "https://t.me/s");
    }

    #[test]
    fn test_client_construction() {
        assert!(ChannelClient::new(ChannelConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_error_mapping() {
        let err: BackendError = ChannelError::Timeout.into();
        assert!(matches!(err, BackendError::Timeout));

        let err: BackendError = ChannelError::HttpStatus { status: 503 }.into();
        assert!(matches!(err, BackendError::Http(msg) if msg.contains("503")));
    }
}
