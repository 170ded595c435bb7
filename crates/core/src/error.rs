//! Unified error types for fansearch.
//!
//! Per-backend and per-task failures are contained at the orchestrator
//! boundary (logged and excluded from aggregation); only cache and shutdown
//! errors propagate to the process-level caller. A cache miss is not an
//! error, it is `Ok(None)`.

use std::time::Duration;

use tokio_rusqlite::rusqlite;

/// Unified error type for the fansearch core and engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single backend failed or timed out. Never fails the whole query.
    #[error("backend '{name}' failed: {message}")]
    Backend { name: String, message: String },

    /// The task pool rejected a submission (backpressure). The backend is
    /// skipped for this query.
    #[error("task queue full (max {max} pending)")]
    QueueFull { max: usize },

    /// A backend name was registered twice. Configuration bug, fails startup.
    #[error("duplicate backend name: {0}")]
    DuplicateName(String),

    /// Malformed search query (e.g. empty keyword).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Disk cache database operation failed.
    #[error("cache database error: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("cache migration failed: {0}")]
    MigrationFailed(String),

    /// Disk cache could not be opened; the cache degrades to memory-only.
    #[error("disk cache unavailable at '{path}': {message}")]
    DiskUnavailable { path: String, message: String },

    /// The final flush did not complete within the shutdown timeout.
    /// Surfaced to the process exit path as data-loss risk, never retried.
    #[error("shutdown flush did not complete within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    /// The batch write manager has stopped accepting enqueues.
    #[error("cache write manager is shut down")]
    WriteManagerClosed,

    /// Cache payload could not be (de)serialized.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DuplicateName("labi".to_string());
        assert!(err.to_string().contains("duplicate backend name"));
        assert!(err.to_string().contains("labi"));
    }

    #[test]
    fn test_queue_full_display() {
        let err = Error::QueueFull { max: 100 };
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_backend_error_display() {
        let err = Error::Backend { name: "discourse".into(), message: "HTTP 503".into() };
        assert!(err.to_string().contains("discourse"));
        assert!(err.to_string().contains("HTTP 503"));
    }
}
