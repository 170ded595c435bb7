//! Search data model: queries, results, and the merge/dedup rules.
//!
//! Results from different backends for the same query are comparable by a
//! normalized dedup key derived from the primary link and the title.
//! Duplicates are merged keeping the highest-priority source's metadata;
//! within a single backend's sequence, source order is preserved.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A search query. Immutable once issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Search keyword (required).
    pub keyword: String,

    /// Explicit broadcast channel set. `None` uses the configured default.
    #[serde(default)]
    pub channels: Option<Vec<String>>,

    /// Plugin-name allow-list. `None` resolves the full registered set;
    /// `Some(vec![])` resolves none.
    #[serde(default)]
    pub plugins: Option<Vec<String>>,

    /// Requested fan-out concurrency. `None` uses the configured value.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl SearchQuery {
    /// Create a query for a bare keyword with all defaults.
    pub fn new(keyword: impl Into<String>) -> Self {
        Self { keyword: keyword.into(), ..Default::default() }
    }

    /// Canonical form used for cache key derivation.
    ///
    /// Keyword is trimmed and lowercased; channel and plugin lists are
    /// sorted so that equivalent queries map to the same key.
    pub fn canonical(&self) -> String {
        let keyword = self.keyword.trim().to_lowercase();

        let mut parts = vec![keyword];
        for list in [&self.channels, &self.plugins] {
            match list {
                Some(names) => {
                    let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
                    sorted.sort_unstable();
                    parts.push(sorted.join(","));
                }
                None => parts.push("*".to_string()),
            }
        }

        parts.join("|")
    }
}

/// Family of a share link, classified by URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Baidu,
    Aliyun,
    Quark,
    Pan115,
    Magnet,
    Ed2k,
    Other,
}

impl LinkKind {
    /// Classify a URL into a link family.
    pub fn classify(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.starts_with("magnet:") {
            LinkKind::Magnet
        } else if lower.starts_with("ed2k://") {
            LinkKind::Ed2k
        } else if lower.contains("pan.baidu.com") {
            LinkKind::Baidu
        } else if lower.contains("alipan.com") || lower.contains("aliyundrive.com") {
            LinkKind::Aliyun
        } else if lower.contains("pan.quark.cn") {
            LinkKind::Quark
        } else if lower.contains("115.com") || lower.contains("115cdn.com") {
            LinkKind::Pan115
        } else {
            LinkKind::Other
        }
    }
}

/// A canonical link carried by a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLink {
    pub url: String,
    pub kind: LinkKind,
}

impl ResultLink {
    /// Build a link, classifying its family from the URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = LinkKind::classify(&url);
        Self { url, kind }
    }
}

/// A single search result from one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title.
    pub title: String,

    /// Canonical share links, best first.
    pub links: Vec<ResultLink>,

    /// Originating backend name.
    pub source: String,

    /// Publication time, if the backend exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    /// Backend-specific metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SearchResult {
    /// Normalized dedup key derived from the primary link and the title.
    ///
    /// Two results with the same key are considered duplicates regardless of
    /// which backend produced them.
    pub fn dedup_key(&self) -> String {
        let link = self.links.first().map(|l| normalize_url(&l.url)).unwrap_or_default();
        format!("{}\n{}", link, normalize_title(&self.title))
    }
}

/// One backend's ordered result sequence, tagged for merging.
#[derive(Debug, Clone)]
pub struct BackendResults {
    pub source: String,
    pub priority: i32,
    pub results: Vec<SearchResult>,
}

/// Merged response returned to the caller and stored in the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    pub fn from_results(results: Vec<SearchResult>) -> Self {
        Self { total: results.len(), results }
    }
}

/// Merge and deduplicate result sequences from multiple backends.
///
/// Batches are visited in (priority ascending, source name ascending) order,
/// so the first occurrence of a dedup key comes from the highest-priority
/// source and its metadata wins. Later duplicates contribute any links the
/// winner does not already carry, plus a published time if the winner lacks
/// one. Within a batch, source order is preserved. Idempotent: merging a
/// merged set with itself yields the same set.
pub fn merge_results(mut batches: Vec<BackendResults>) -> Vec<SearchResult> {
    batches.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.source.cmp(&b.source)));

    let mut merged: Vec<SearchResult> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();

    for batch in batches {
        for result in batch.results {
            let key = result.dedup_key();
            match index.get(&key) {
                Some(&slot) => {
                    let existing = &mut merged[slot];
                    for link in result.links {
                        if !existing.links.contains(&link) {
                            existing.links.push(link);
                        }
                    }
                    if existing.published.is_none() {
                        existing.published = result.published;
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(result);
                }
            }
        }
    }

    merged
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_lowercase()
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}
