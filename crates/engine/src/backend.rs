//! Backend capability traits.
//!
//! A backend is an independent content source, opaque to the engine beyond
//! its name, priority, and execution capability. The optional web-route
//! capability is checked by capability query, never by type inspection.

use async_trait::async_trait;
use fansearch_core::{SearchQuery, SearchResult};

/// Errors produced by a single backend execution.
///
/// Always contained at the orchestrator boundary: a failing backend is
/// logged and excluded from aggregation, never fatal to the query.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Upstream HTTP failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream responded but the payload could not be understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// The backend's own request timed out.
    #[error("request timeout")]
    Timeout,

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// A registered search backend ("plugin").
///
/// Implementations must be cheap to share (`Arc<dyn SearchBackend>`) and
/// safe to execute concurrently for distinct queries.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Unique backend name, the registry key.
    fn name(&self) -> &str;

    /// Merge precedence; lower wins ties during dedup.
    fn priority(&self) -> i32;

    /// Execute the query and return an ordered result sequence.
    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, BackendError>;

    /// Optional capability: auxiliary routes for the boundary layer to
    /// mount. The engine only enumerates these, it does not interpret them.
    fn web_routes(&self) -> Option<axum::Router> {
        None
    }
}

/// Searches a single broadcast channel for a keyword.
///
/// Channels are fanned out one task per channel, alongside the plugin
/// backends, and merged at the highest priority.
#[async_trait]
pub trait ChannelSearch: Send + Sync {
    async fn search(&self, channel: &str, keyword: &str) -> Result<Vec<SearchResult>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainBackend;

    #[async_trait]
    impl SearchBackend for PlainBackend {
        fn name(&self) -> &str {
            "plain"
        }

        fn priority(&self) -> i32 {
            1
        }

        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, BackendError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_web_routes_defaults_to_none() {
        let backend = PlainBackend;
        assert!(backend.web_routes().is_none());
        assert!(backend.execute(&SearchQuery::new("x")).await.unwrap().is_empty());
    }
}
