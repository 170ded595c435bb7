//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FANSEARCH_*)
//! 2. TOML config file (if FANSEARCH_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The configuration is resolved once at startup into an immutable snapshot;
//! nothing re-reads it mid-run.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Fixed safety margin added on top of channel + plugin counts when deriving
/// the default fan-out concurrency.
pub const CONCURRENCY_SAFETY_MARGIN: usize = 10;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FANSEARCH_*)
/// 2. TOML config file (if FANSEARCH_CONFIG_FILE set)
/// 3. Built-in defaults
///
/// Derived values (concurrency, worker and task counts) are computed through
/// the `effective_*` accessors; a value of 0 means "derive".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default broadcast channel list, searched on every query that does not
    /// supply its own channel set.
    #[serde(default = "default_channels")]
    pub default_channels: Vec<String>,

    /// Enabled plugin allow-list. Unset resolves every registered plugin;
    /// an explicitly empty list resolves none.
    #[serde(default)]
    pub enabled_plugins: Option<Vec<String>>,

    /// Total fan-out concurrency per query.
    ///
    /// 0 derives channels + plugins + safety margin (floor 1).
    #[serde(default)]
    pub concurrency: usize,

    /// Client-visible response deadline in seconds.
    ///
    /// 0 means "cache state only, dispatch nothing".
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Pool-level execution ceiling per backend task, in seconds. Bounds how
    /// long abandoned background tasks may run.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Maximum background worker slots. 0 derives CPU count x 5, floor 20.
    #[serde(default)]
    pub max_background_workers: usize,

    /// Maximum queued-plus-running tasks. 0 derives workers x 5, floor 100.
    #[serde(default)]
    pub max_background_tasks: usize,

    /// Whether the two-level cache is enabled.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Path to the SQLite disk cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Maximum total disk cache payload size in megabytes.
    #[serde(default = "default_cache_max_size_mb")]
    pub cache_max_size_mb: u64,

    /// TTL for synchronous (possibly partial) answers, in minutes.
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    /// TTL for background-completed answers, in hours. Longer-lived than the
    /// synchronous TTL so fuller result sets supersede partial ones.
    #[serde(default = "default_async_cache_ttl_hours")]
    pub async_cache_ttl_hours: u64,

    /// Write-behind coalescing window in milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Buffer size that triggers an early batch flush.
    #[serde(default = "default_batch_max_entries")]
    pub batch_max_entries: usize,

    /// User-Agent string for outbound HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_port() -> u16 {
    8888
}

fn default_channels() -> Vec<String> {
    [
        "tgsearchers4",
        "Aliyun_4K_Movies",
        "yunpanx",
        "yunpanxunlei",
        "tianyifc",
        "BaiduCloudDisk",
        "shareAliyun",
        "Quark_Movies",
        "dianyingshare",
        "ucquark",
        "QukanMovie",
        "Netdisk_Movies",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_response_timeout_secs() -> u64 {
    4
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache/fansearch.sqlite")
}

fn default_cache_max_size_mb() -> u64 {
    100
}

fn default_cache_ttl_minutes() -> u64 {
    60
}

fn default_async_cache_ttl_hours() -> u64 {
    1
}

fn default_batch_interval_ms() -> u64 {
    500
}

fn default_batch_max_entries() -> usize {
    64
}

fn default_user_agent() -> String {
    concat!("fansearch/", env!("CARGO_PKG_VERSION")).into()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            default_channels: default_channels(),
            enabled_plugins: None,
            concurrency: 0,
            response_timeout_secs: default_response_timeout_secs(),
            backend_timeout_secs: default_backend_timeout_secs(),
            max_background_workers: 0,
            max_background_tasks: 0,
            cache_enabled: true,
            cache_path: default_cache_path(),
            cache_max_size_mb: default_cache_max_size_mb(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            async_cache_ttl_hours: default_async_cache_ttl_hours(),
            batch_interval_ms: default_batch_interval_ms(),
            batch_max_entries: default_batch_max_entries(),
            user_agent: default_user_agent(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be read or parsed, or if
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FANSEARCH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("FANSEARCH_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Client-visible response deadline.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Pool-level per-task execution ceiling.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// TTL for synchronous answers.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    /// TTL for background-completed answers.
    pub fn async_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.async_cache_ttl_hours * 3600)
    }

    /// Write-behind coalescing window.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Fan-out concurrency for a query against `plugin_count` plugins.
    ///
    /// An explicit setting wins; otherwise channels + plugins + margin,
    /// floor 1.
    pub fn effective_concurrency(&self, plugin_count: usize) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        (self.default_channels.len() + plugin_count + CONCURRENCY_SAFETY_MARGIN).max(1)
    }

    /// Background worker slot count: explicit, or CPU count x 5, floor 20.
    pub fn effective_workers(&self) -> usize {
        if self.max_background_workers > 0 {
            return self.max_background_workers;
        }
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cpus * 5).max(20)
    }

    /// Pending-task ceiling: explicit, or workers x 5, floor 100.
    pub fn effective_max_tasks(&self) -> usize {
        if self.max_background_tasks > 0 {
            return self.max_background_tasks;
        }
        (self.effective_workers() * 5).max(100)
    }
}
