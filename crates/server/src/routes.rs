//! REST API router and handlers.
//!
//! Routes: `GET|POST /api/search` and `GET /api/health`, plus any auxiliary
//! routes exposed by backends through the web-route capability. The server
//! only enumerates those; it does not interpret them.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fansearch_core::{SearchQuery, SearchResponse};
use fansearch_engine::SearchService;

use crate::error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SearchService>,
}

/// Build the API router with all routes and middleware.
pub fn build_router(service: Arc<SearchService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/api/search", get(search_get).post(search_post))
        .route("/api/health", get(health))
        .with_state(AppState { service: Arc::clone(&service) });

    // Mount auxiliary routes from backends that expose the capability.
    for backend in service.registry().iter() {
        if let Some(routes) = backend.web_routes() {
            tracing::debug!(backend = backend.name(), "mounting backend web routes");
            router = router.merge(routes);
        }
    }

    router.layer(TraceLayer::new_for_http()).layer(cors)
}

/// Search via query string: `kw` (required), `channels`, `plugins` (comma
/// lists), `conc`, `refresh`.
async fn search_get(
    State(state): State<AppState>, Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SearchResponse>, ApiError> {
    let keyword = params
        .get("kw")
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("kw is required".into()))?;

    let query = SearchQuery {
        keyword,
        channels: params.get("channels").map(|s| split_csv(s)),
        plugins: params.get("plugins").map(|s| split_csv(s)),
        concurrency: params.get("conc").and_then(|s| s.parse().ok()),
    };
    let refresh = params
        .get("refresh")
        .is_some_and(|v| v == "true" || v == "1");

    let response = state.service.search_with(query, refresh).await?;
    Ok(Json(response))
}

/// JSON body for POST /api/search.
#[derive(Debug, Deserialize)]
struct SearchBody {
    kw: String,
    #[serde(default)]
    channels: Option<Vec<String>>,
    #[serde(default)]
    plugins: Option<Vec<String>>,
    #[serde(default)]
    conc: Option<usize>,
    #[serde(default)]
    refresh: bool,
}

async fn search_post(
    State(state): State<AppState>, Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = SearchQuery {
        keyword: body.kw,
        channels: body.channels,
        plugins: body.plugins,
        concurrency: body.conc,
    };
    let response = state.service.search_with(query, body.refresh).await?;
    Ok(Json(response))
}

/// Health check: status plus the active channel and plugin sets.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let config = state.service.config();
    let plugins = state.service.registry().names();

    Json(json!({
        "status": "ok",
        "channels": config.default_channels,
        "channels_count": config.default_channels.len(),
        "plugins": plugins,
        "plugin_count": plugins.len(),
    }))
}

/// Split a comma-separated parameter, dropping empty segments.
///
/// An empty string yields an empty list, which downstream means "explicitly
/// none" rather than "use the default set".
fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fansearch_core::{AppConfig, SearchResult};
    use fansearch_engine::backend::{BackendError, ChannelSearch};
    use fansearch_engine::pool::PoolConfig;
    use fansearch_engine::{BackendRegistry, TaskPool};
    use tower::util::ServiceExt;

    struct NoChannels;

    #[async_trait]
    impl ChannelSearch for NoChannels {
        async fn search(&self, _channel: &str, _keyword: &str) -> Result<Vec<SearchResult>, BackendError> {
            Ok(vec![])
        }
    }

    fn router() -> Router {
        let config = AppConfig { default_channels: vec![], response_timeout_secs: 1, ..Default::default() };
        let service = Arc::new(SearchService::new(
            Arc::new(BackendRegistry::new()),
            Arc::new(NoChannels),
            Arc::new(TaskPool::new(PoolConfig::default())),
            None,
            Arc::new(config),
        ));
        build_router(service)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = router()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["plugin_count"], 0);
    }

    #[tokio::test]
    async fn test_search_requires_keyword() {
        let response = router()
            .oneshot(Request::builder().uri("/api/search").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_with_no_targets_returns_empty() {
        let response = router()
            .oneshot(Request::builder().uri("/api/search?kw=test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: SearchResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.total, 0);
    }

    #[tokio::test]
    async fn test_search_post_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/search")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"kw": "test", "plugins": []}"#))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
