//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use thiserror::Error;

use crate::config::AppConfig;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `response_timeout_secs` exceeds 10 minutes
    /// - `backend_timeout_secs` is 0 or exceeds 1 hour
    /// - `cache_max_size_mb` is 0 while the cache is enabled
    /// - `batch_max_entries` is 0
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_secs > 600 {
            return Err(ConfigError::Invalid {
                field: "response_timeout_secs".into(),
                reason: "must not exceed 10 minutes (600s)".into(),
            });
        }

        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "backend_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.backend_timeout_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "backend_timeout_secs".into(),
                reason: "must not exceed 1 hour (3600s)".into(),
            });
        }

        if self.cache_enabled && self.cache_max_size_mb == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_max_size_mb".into(),
                reason: "must be greater than 0 when the cache is enabled".into(),
            });
        }

        if self.batch_max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_max_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.backend_timeout_secs < self.response_timeout_secs {
            tracing::warn!(
                backend_timeout_secs = self.backend_timeout_secs,
                response_timeout_secs = self.response_timeout_secs,
                "backend timeout is shorter than the response deadline; \
                 background completion will never outlive the synchronous answer"
            );
        }

        Ok(())
    }
}
