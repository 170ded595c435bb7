//! Shared HTTP client construction for backends.

use std::time::Duration;

/// Configuration for outbound backend HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// User agent string (default: "fansearch/<version>").
    pub user_agent: String,

    /// Request timeout (default: 10s).
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("fansearch/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client with this configuration applied.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .gzip(true)
            .build()
    }
}
