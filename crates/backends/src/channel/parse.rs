//! Broadcast message parsing and share-link extraction.
//!
//! The public web preview of a channel renders each message as a
//! `.tgme_widget_message` block. A message becomes a search result only if
//! it carries at least one recognizable share link.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};

use fansearch_core::SearchResult;
use fansearch_core::model::ResultLink;

static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"https?://pan\.baidu\.com/s/[0-9A-Za-z_-]+(?:\?pwd=[0-9A-Za-z]+)?",
        r"https?://(?:www\.)?(?:alipan|aliyundrive)\.com/s/[0-9A-Za-z]+",
        r"https?://pan\.quark\.cn/s/[0-9A-Za-z]+",
        r"https?://(?:115|115cdn)\.com/s/[0-9A-Za-z]+",
        r"magnet:\?xt=urn:btih:[0-9A-Fa-f]+[^\s\x22'<]*",
        r"ed2k://\|file\|[^|]+\|\d+\|[0-9A-Fa-f]+\|/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static link pattern"))
    .collect()
});

static MESSAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.tgme_widget_message").expect("static selector"));
static TEXT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.tgme_widget_message_text").expect("static selector"));
static DATE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.tgme_widget_message_date time").expect("static selector"));

/// Extract every recognized share link from a text blob, in order, deduped.
pub fn extract_share_links(text: &str) -> Vec<ResultLink> {
    let mut links: Vec<ResultLink> = Vec::new();
    for pattern in LINK_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            let link = ResultLink::new(m.as_str());
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }
    links
}

/// Parse a channel preview page into search results.
///
/// Messages without share links are skipped. The first non-empty line of
/// the message text becomes the title.
pub fn parse_channel_page(html: &str, channel: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for message in document.select(&MESSAGE_SELECTOR) {
        let Some(text_node) = message.select(&TEXT_SELECTOR).next() else {
            continue;
        };

        let text = text_node.text().collect::<Vec<_>>().join("\n");
        // Links may live in hrefs rather than visible text.
        let raw_html = text_node.html();
        let mut links = extract_share_links(&text);
        for link in extract_share_links(&raw_html) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        if links.is_empty() {
            continue;
        }

        let title = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or(channel)
            .to_string();

        let published = message
            .select(&DATE_SELECTOR)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));

        let mut metadata = BTreeMap::new();
        if let Some(post) = message.value().attr("data-post") {
            metadata.insert("message".to_string(), post.to_string());
        }

        results.push(SearchResult {
            title,
            links,
            source: channel.to_string(),
            published,
            metadata,
        });
    }

    results
}
