//! Search orchestrator.
//!
//! The façade over the registry, task pool, and cache. On a query it
//! resolves the fan-out set (broadcast channels + filtered plugins),
//! dispatches one task per target, and answers at the configured deadline
//! with whatever has arrived, merged and deduplicated. Tasks still running
//! at the deadline are not cancelled: a detached collector keeps re-merging
//! their results into the cache under the same key, so later reads see the
//! fuller answer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fansearch_core::cache::query_cache_key;
use fansearch_core::model::{BackendResults, merge_results};
use fansearch_core::{AppConfig, Error, SearchCache, SearchQuery, SearchResponse};

use crate::backend::ChannelSearch;
use crate::pool::{SearchTask, TaskCompletion, TaskOutcome, TaskPool};
use crate::registry::BackendRegistry;

/// Merge priority for broadcast-channel results. Ahead of every plugin
/// (whose priorities start at 1), so channel metadata wins dedup ties.
const CHANNEL_PRIORITY: i32 = 0;

/// Merged-so-far view published by the collector after every completion.
#[derive(Debug, Clone, Default)]
struct Progress {
    results: Vec<fansearch_core::SearchResult>,
    completed: usize,
}

/// Shared accumulator for one query's fan-out.
struct Aggregate {
    batches: Mutex<Vec<BackendResults>>,
    /// Flipped when the synchronous waiter returns; later cache writes use
    /// the longer-lived background TTL.
    sync_done: AtomicBool,
}

/// The search service façade.
pub struct SearchService {
    registry: Arc<BackendRegistry>,
    channel_search: Arc<dyn ChannelSearch>,
    pool: Arc<TaskPool>,
    cache: Option<Arc<SearchCache>>,
    config: Arc<AppConfig>,
}

impl SearchService {
    pub fn new(
        registry: Arc<BackendRegistry>, channel_search: Arc<dyn ChannelSearch>, pool: Arc<TaskPool>,
        cache: Option<Arc<SearchCache>>, config: Arc<AppConfig>,
    ) -> Self {
        Self { registry, channel_search, pool, cache, config }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Execute a search, answering within the configured response deadline.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResponse, Error> {
        self.search_with(query, false).await
    }

    /// Execute a search, optionally bypassing the cache read.
    pub async fn search_with(&self, query: SearchQuery, force_refresh: bool) -> Result<SearchResponse, Error> {
        if query.keyword.trim().is_empty() {
            return Err(Error::InvalidQuery("keyword cannot be empty".into()));
        }

        let started = Instant::now();
        let key = query_cache_key(&query);

        if !force_refresh
            && let Some(cache) = &self.cache
            && let Some(payload) = cache.get(&key).await
            && let Ok(response) = serde_json::from_slice::<SearchResponse>(&payload)
        {
            debug!(keyword = %query.keyword, "cache hit");
            return Ok(response);
        }

        let deadline = self.config.response_timeout();
        if deadline.is_zero() {
            // Cache-only mode: report the (empty) immediate state and
            // dispatch nothing.
            return Ok(SearchResponse::default());
        }

        let filter = query.plugins.as_ref().or(self.config.enabled_plugins.as_ref());
        let plugins = self.registry.resolve(filter.map(|v| v.as_slice()));
        let channels = query
            .channels
            .clone()
            .unwrap_or_else(|| self.config.default_channels.clone());
        let limit = query
            .concurrency
            .filter(|&c| c > 0)
            .unwrap_or_else(|| self.config.effective_concurrency(plugins.len()));

        let mut tasks: Vec<SearchTask> = Vec::with_capacity(channels.len() + plugins.len());
        let keyword = query.keyword.trim().to_string();
        for channel in channels {
            let searcher = Arc::clone(&self.channel_search);
            let kw = keyword.clone();
            let source = channel.clone();
            tasks.push(SearchTask {
                source: channel,
                priority: CHANNEL_PRIORITY,
                fut: Box::pin(async move { searcher.search(&source, &kw).await }),
            });
        }
        for backend in plugins {
            let source = backend.name().to_string();
            let priority = backend.priority();
            let q = query.clone();
            tasks.push(SearchTask {
                source,
                priority,
                fut: Box::pin(async move { backend.execute(&q).await }),
            });
        }
        tasks.truncate(limit);

        if tasks.is_empty() {
            // Zero targets resolved: an empty answer, not an error.
            return Ok(SearchResponse::default());
        }

        let (completion_tx, completion_rx) = mpsc::channel(tasks.len());
        let mut submitted = 0usize;
        for task in tasks {
            let source = task.source.clone();
            match self.pool.submit(task, completion_tx.clone()) {
                Ok(_handle) => submitted += 1,
                Err(e) => warn!(source = %source, "backend skipped: {e}"),
            }
        }
        drop(completion_tx);

        if submitted == 0 {
            return Ok(SearchResponse::default());
        }

        let aggregate = Arc::new(Aggregate { batches: Mutex::new(Vec::new()), sync_done: AtomicBool::new(false) });
        let (progress_tx, mut progress_rx) = watch::channel(Progress::default());

        tokio::spawn(collect(
            completion_rx,
            Arc::clone(&aggregate),
            self.cache.clone(),
            key,
            self.config.cache_ttl(),
            self.config.async_cache_ttl(),
            progress_tx,
        ));

        let deadline_at = started + deadline;
        loop {
            if progress_rx.borrow_and_update().completed >= submitted {
                break;
            }
            match tokio::time::timeout_at(deadline_at, progress_rx.changed()).await {
                Ok(Ok(())) => continue,
                // Collector gone or deadline fired; answer with what we have.
                Ok(Err(_)) | Err(_) => break,
            }
        }

        aggregate.sync_done.store(true, Ordering::SeqCst);
        let progress = progress_rx.borrow().clone();
        info!(
            keyword = %query.keyword,
            submitted,
            completed = progress.completed,
            results = progress.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search answered"
        );

        Ok(SearchResponse::from_results(progress.results))
    }
}

/// Detached per-query collector.
///
/// Owns the completion channel for the query's tasks and outlives the
/// synchronous waiter: every task that completes after the client was
/// answered still lands here, gets re-merged, and supersedes the cached
/// answer. It only ever touches the cache, never the original request's
/// response channel.
async fn collect(
    mut rx: mpsc::Receiver<TaskCompletion>, aggregate: Arc<Aggregate>, cache: Option<Arc<SearchCache>>, key: String,
    cache_ttl: Duration, async_ttl: Duration, progress_tx: watch::Sender<Progress>,
) {
    let mut completed = 0usize;
    let mut merged: Vec<fansearch_core::SearchResult> = Vec::new();

    while let Some(completion) = rx.recv().await {
        completed += 1;
        match completion.outcome {
            TaskOutcome::Completed(results) => {
                let batches = {
                    let mut batches = aggregate.batches.lock();
                    batches.push(BackendResults {
                        source: completion.source,
                        priority: completion.priority,
                        results,
                    });
                    batches.clone()
                };
                merged = merge_results(batches);

                if let Some(cache) = &cache {
                    let background = aggregate.sync_done.load(Ordering::SeqCst);
                    let ttl = if background { async_ttl } else { cache_ttl };
                    match serde_json::to_vec(&SearchResponse::from_results(merged.clone())) {
                        Ok(payload) => cache.set(&key, payload, ttl).await,
                        Err(e) => warn!("failed to serialize cached results: {e}"),
                    }
                }
            }
            TaskOutcome::Failed(e) => {
                warn!(source = %completion.source, "backend failed: {e}");
            }
            TaskOutcome::TimedOut => {
                warn!(source = %completion.source, "backend abandoned at pool ceiling");
            }
            TaskOutcome::Cancelled => {
                debug!(source = %completion.source, "backend cancelled");
            }
        }

        let _ = progress_tx.send(Progress { results: merged.clone(), completed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, SearchBackend};
    use crate::pool::PoolConfig;
    use async_trait::async_trait;
    use fansearch_core::model::ResultLink;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn result(source: &str, title: &str, link: &str) -> fansearch_core::SearchResult {
        fansearch_core::SearchResult {
            title: title.to_string(),
            links: vec![ResultLink::new(link)],
            source: source.to_string(),
            published: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Channel searcher that returns nothing, instantly.
    struct NoChannels;

    #[async_trait]
    impl ChannelSearch for NoChannels {
        async fn search(&self, _channel: &str, _keyword: &str) -> Result<Vec<fansearch_core::SearchResult>, BackendError> {
            Ok(vec![])
        }
    }

    /// Backend answering a fixed result set after a delay.
    struct DelayedBackend {
        name: &'static str,
        priority: i32,
        delay: Duration,
        results: Vec<fansearch_core::SearchResult>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchBackend for DelayedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<fansearch_core::SearchResult>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.results.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SearchBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn priority(&self) -> i32 {
            1
        }

        async fn execute(&self, _query: &SearchQuery) -> Result<Vec<fansearch_core::SearchResult>, BackendError> {
            Err(BackendError::Http("HTTP 502".into()))
        }
    }

    struct Harness {
        registry: BackendRegistry,
        config: AppConfig,
        pool: PoolConfig,
        cache: Option<Arc<SearchCache>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: BackendRegistry::new(),
                config: AppConfig {
                    default_channels: vec![],
                    response_timeout_secs: 1,
                    ..Default::default()
                },
                pool: PoolConfig::default(),
                cache: Some(Arc::new(SearchCache::memory_only())),
            }
        }

        fn build(self) -> SearchService {
            SearchService::new(
                Arc::new(self.registry),
                Arc::new(NoChannels),
                Arc::new(TaskPool::new(self.pool)),
                self.cache,
                Arc::new(self.config),
            )
        }
    }

    fn delayed(
        name: &'static str, priority: i32, delay_ms: u64, results: Vec<fansearch_core::SearchResult>,
    ) -> (Arc<DelayedBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(DelayedBackend {
            name,
            priority,
            delay: Duration::from_millis(delay_ms),
            results,
            calls: Arc::clone(&calls),
        });
        (backend, calls)
    }

    #[tokio::test]
    async fn test_empty_keyword_is_invalid() {
        let service = Harness::new().build();
        let err = service.search(SearchQuery::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_partial_answer_then_eventual_completeness() {
        let mut harness = Harness::new();
        // timeout sits between the fast and slow backends.
        harness.config.response_timeout_secs = 1;

        let (fast, _) = delayed("fast", 1, 50, vec![result("fast", "A", "http://x")]);
        let (slow, _) = delayed(
            "slow",
            2,
            2500,
            vec![result("slow", "A", "http://x"), result("slow", "B", "http://y")],
        );
        harness.registry.register(fast).unwrap();
        harness.registry.register(slow).unwrap();
        let service = harness.build();

        let response = service.search(SearchQuery::new("test123")).await.unwrap();
        let titles: Vec<&str> = response.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A"], "synchronous answer holds only the fast backend");

        // After the slow backend lands, the cached answer is a superset.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        let cached = service.search(SearchQuery::new("test123")).await.unwrap();
        let mut titles: Vec<&str> = cached.results.iter().map(|r| r.title.as_str()).collect();
        titles.sort_unstable();
        assert_eq!(titles, vec!["A", "B"]);
        // Deduplicated: "A" appears once even though both backends returned it.
        assert_eq!(cached.total, 2);
    }

    #[tokio::test]
    async fn test_deadline_bound_with_only_slow_backends() {
        let mut harness = Harness::new();
        harness.config.response_timeout_secs = 1;
        let (slow, _) = delayed("slow", 1, 30_000, vec![result("slow", "A", "http://x")]);
        harness.registry.register(slow).unwrap();
        let service = harness.build();

        let started = Instant::now();
        let response = service.search(SearchQuery::new("nothing-yet")).await.unwrap();
        assert!(response.results.is_empty());
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "must answer near the deadline, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_all_backends_failing_is_not_an_error() {
        let mut harness = Harness::new();
        harness.registry.register(Arc::new(FailingBackend)).unwrap();
        let service = harness.build();

        let response = service.search(SearchQuery::new("doomed")).await.unwrap();
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn test_zero_targets_resolved_is_empty_answer() {
        let service = Harness::new().build();
        let response = service.search(SearchQuery::new("nobody-home")).await.unwrap();
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn test_zero_deadline_dispatches_nothing() {
        let mut harness = Harness::new();
        harness.config.response_timeout_secs = 0;
        let (backend, calls) = delayed("never", 1, 0, vec![result("never", "A", "http://x")]);
        harness.registry.register(backend).unwrap();
        let service = harness.build();

        let response = service.search(SearchQuery::new("cache-only")).await.unwrap();
        assert_eq!(response.total, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no backend may run in cache-only mode");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_dispatch() {
        let mut harness = Harness::new();
        let (backend, calls) = delayed("counted", 1, 0, vec![result("counted", "A", "http://x")]);
        harness.registry.register(backend).unwrap();
        let service = harness.build();

        let first = service.search(SearchQuery::new("warm")).await.unwrap();
        assert_eq!(first.total, 1);
        // Collector needs a beat to write the cache entry.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = service.search(SearchQuery::new("warm")).await.unwrap();
        assert_eq!(second.total, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second query must be served from cache");
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache_read() {
        let mut harness = Harness::new();
        let (backend, calls) = delayed("counted", 1, 0, vec![result("counted", "A", "http://x")]);
        harness.registry.register(backend).unwrap();
        let service = harness.build();

        service.search(SearchQuery::new("warm")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.search_with(SearchQuery::new("warm"), true).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queue_full_skips_backend_without_failing_query() {
        let mut harness = Harness::new();
        harness.pool = PoolConfig { max_workers: 1, max_pending: 1, task_timeout: Duration::from_secs(5) };
        let (a, _) = delayed("aa", 1, 10, vec![result("aa", "A", "http://x")]);
        let (b, _) = delayed("bb", 2, 10, vec![result("bb", "B", "http://y")]);
        let (c, _) = delayed("cc", 3, 10, vec![result("cc", "C", "http://z")]);
        harness.registry.register(a).unwrap();
        harness.registry.register(b).unwrap();
        harness.registry.register(c).unwrap();
        let service = harness.build();

        // Only one slot: the other submissions are skipped, the query still
        // answers with whatever was admitted.
        let response = service.search(SearchQuery::new("crowded")).await.unwrap();
        assert_eq!(response.total, 1);
    }

    #[tokio::test]
    async fn test_plugin_filter_limits_fanout() {
        let mut harness = Harness::new();
        let (a, a_calls) = delayed("aa", 1, 0, vec![result("aa", "A", "http://x")]);
        let (b, b_calls) = delayed("bb", 2, 0, vec![result("bb", "B", "http://y")]);
        harness.registry.register(a).unwrap();
        harness.registry.register(b).unwrap();
        let service = harness.build();

        let query = SearchQuery { keyword: "filtered".into(), plugins: Some(vec!["aa".into()]), ..Default::default() };
        let response = service.search(query).await.unwrap();

        assert_eq!(response.total, 1);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }
}
