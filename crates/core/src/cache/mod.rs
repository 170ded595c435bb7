//! Two-level cache with write-behind persistence.
//!
//! This module provides the result cache for the search orchestrator:
//!
//! - Deterministic cache keys (SHA-256 over the canonical query form)
//! - A sharded in-memory tier with lazy expiry
//! - A SQLite disk tier with automatic schema migrations and WAL mode
//! - A delayed batch write manager that decouples disk writes from
//!   request latency

pub mod batch;
pub mod disk;
pub mod key;
pub mod memory;
pub mod migrations;
pub mod two_level;

pub use batch::{BatchConfig, BatchWriteManager};
pub use disk::{CacheDb, DiskEntry, DiskWrite};
pub use key::query_cache_key;
pub use memory::{CacheLevel, MemoryCache, MemoryEntry};
pub use two_level::SearchCache;
