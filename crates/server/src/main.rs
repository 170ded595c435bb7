//! fansearch server entry point.
//!
//! Boots the HTTP API: configuration snapshot, explicit backend
//! registration, two-level cache with write-behind, bounded task pool, and
//! the search orchestrator. Shutdown drains the cache write buffer before
//! the process exits; a flush timeout is surfaced as a startup-style error
//! because it means acknowledged writes may be lost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fansearch_backends::{ChannelClient, ChannelConfig, DiscourseBackend, HttpConfig};
use fansearch_core::cache::BatchConfig;
use fansearch_core::{AppConfig, SearchCache};
use fansearch_engine::pool::PoolConfig;
use fansearch_engine::{BackendRegistry, SearchService, TaskPool};

mod error;
mod routes;

/// How long the final cache flush may take before we report data-loss risk.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(AppConfig::load().context("loading configuration")?);

    let http = HttpConfig { user_agent: config.user_agent.clone(), ..Default::default() };
    let registry = Arc::new(build_registry(&http)?);

    let cache = if config.cache_enabled {
        let batch = BatchConfig {
            interval: config.batch_interval(),
            max_entries: config.batch_max_entries,
            max_bytes: Some(config.cache_max_size_mb * 1024 * 1024),
        };
        Some(Arc::new(SearchCache::open(&config.cache_path, batch).await))
    } else {
        None
    };

    let pool = Arc::new(TaskPool::new(PoolConfig {
        max_workers: config.effective_workers(),
        max_pending: config.effective_max_tasks(),
        task_timeout: config.backend_timeout(),
    }));

    let channel_client =
        Arc::new(ChannelClient::new(ChannelConfig { http, ..Default::default() }).context("building channel client")?);

    let service = Arc::new(SearchService::new(
        registry.clone(),
        channel_client,
        pool,
        cache.clone(),
        Arc::clone(&config),
    ));

    let router = routes::build_router(service);

    tracing::info!(
        port = config.port,
        channels = config.default_channels.len(),
        plugins = registry.len(),
        concurrency = config.effective_concurrency(registry.len()),
        workers = config.effective_workers(),
        "fansearch started"
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("shutting down, draining cache writes");
    if let Some(cache) = cache {
        cache
            .flush_and_shutdown(SHUTDOWN_FLUSH_TIMEOUT)
            .await
            .context("final cache flush; acknowledged writes may be lost")?;
    }

    tracing::info!("fansearch stopped cleanly");
    Ok(())
}

/// Explicit backend registration list.
///
/// New plugins are added here, never via registration side effects. The
/// `enabled_plugins` configuration filters at resolve time, so everything
/// built in is registered unconditionally.
fn build_registry(http: &HttpConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    registry
        .register(Arc::new(
            DiscourseBackend::new("discourse", "https://linux.do", 5, http)
                .map_err(|e| anyhow::anyhow!("building discourse backend: {e}"))?,
        ))
        .context("registering backends")?;

    Ok(registry)
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
