//! Discourse forum search plugin.
//!
//! Queries a Discourse instance's `/search.json` API and normalizes topic
//! hits into search results. Also exposes a small info route through the
//! optional web-route capability.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use fansearch_core::model::ResultLink;
use fansearch_core::{SearchQuery, SearchResult};
use fansearch_engine::backend::{BackendError, SearchBackend};

use crate::http::HttpConfig;

/// Raw response from the Discourse search API, reduced to what we consume.
#[derive(Debug, Deserialize)]
struct DiscourseResponse {
    #[serde(default)]
    topics: Vec<DiscourseTopic>,
}

#[derive(Debug, Deserialize)]
struct DiscourseTopic {
    id: u64,
    title: String,
    slug: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// A Discourse forum as a search backend.
#[derive(Debug, Clone)]
pub struct DiscourseBackend {
    name: String,
    base_url: String,
    priority: i32,
    http: reqwest::Client,
}

impl DiscourseBackend {
    /// Create a plugin for one Discourse instance.
    ///
    /// `base_url` must not end with a slash (e.g. "https://forum.example.com").
    pub fn new(
        name: impl Into<String>, base_url: impl Into<String>, priority: i32, http: &HttpConfig,
    ) -> Result<Self, BackendError> {
        let client = http.build_client().map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            priority,
            http: client,
        })
    }

    fn normalize(&self, response: DiscourseResponse) -> Vec<SearchResult> {
        response
            .topics
            .into_iter()
            .map(|topic| SearchResult {
                title: topic.title,
                links: vec![ResultLink::new(format!("{}/t/{}/{}", self.base_url, topic.slug, topic.id))],
                source: self.name.clone(),
                published: topic.created_at,
                metadata: BTreeMap::new(),
            })
            .collect()
    }
}

#[async_trait]
impl SearchBackend for DiscourseBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, BackendError> {
        let url = format!("{}/search.json", self.base_url);
        tracing::debug!(plugin = %self.name, keyword = %query.keyword, "searching discourse");

        let response = self
            .http
            .get(&url)
            .query(&[("q", query.keyword.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() { BackendError::Timeout } else { BackendError::Http(e.to_string()) }
            })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(BackendError::Http(format!("HTTP {status}")));
        }

        let parsed: DiscourseResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(self.normalize(parsed))
    }

    fn web_routes(&self) -> Option<Router> {
        let name = self.name.clone();
        let base_url = self.base_url.clone();
        let info = Arc::new(serde_json::json!({ "plugin": name, "forum": base_url }));
        let path = format!("/plugins/{}/info", self.name);
        Some(Router::new().route(&path, get(move || {
            let info = Arc::clone(&info);
            async move { Json(info.as_ref().clone()) }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE_JSON: &str = r#"{
        "posts": [
            {"id": 9, "topic_id": 42, "blurb": "netdisk share inside"}
        ],
        "topics": [
            {
                "id": 42,
                "title": "Interstellar 4K share",
                "slug": "interstellar-4k-share",
                "created_at": "2024-05-01T10:00:00Z"
            },
            {
                "id": 43,
                "title": "Dune Part Two",
                "slug": "dune-part-two",
                "created_at": null
            }
        ]
    }"#;

    fn backend() -> DiscourseBackend {
        DiscourseBackend::new("discourse", "https://forum.example.com/", 5, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(backend().base_url, "https://forum.example.com");
    }

    #[test]
    fn test_normalize_fixture() {
        let parsed: DiscourseResponse = serde_json::from_str(FIXTURE_JSON).unwrap();
        let results = backend().normalize(parsed);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Interstellar 4K share");
        assert_eq!(results[0].links[0].url, "https://forum.example.com/t/interstellar-4k-share/42");
        assert_eq!(results[0].source, "discourse");
        assert!(results[0].published.is_some());
        assert!(results[1].published.is_none());
    }

    #[test]
    fn test_empty_response() {
        let parsed: DiscourseResponse = serde_json::from_str(r#"{"posts": []}"#).unwrap();
        assert!(backend().normalize(parsed).is_empty());
    }

    #[test]
    fn test_web_routes_capability_present() {
        assert!(backend().web_routes().is_some());
    }
}
