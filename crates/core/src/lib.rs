//! Core types and shared functionality for fansearch.
//!
//! This crate provides:
//! - The search data model and merge/dedup rules
//! - The two-level cache with write-behind persistence
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use cache::SearchCache;
pub use config::AppConfig;
pub use error::Error;
pub use model::{BackendResults, SearchQuery, SearchResponse, SearchResult};
