//! Cache key derivation.
//!
//! Keys are SHA-256 over the query's canonical form, so equivalent queries
//! (same keyword modulo case/whitespace, same channel/plugin sets in any
//! order) share one cache entry.

use sha2::{Digest, Sha256};

use crate::model::SearchQuery;

/// Compute the deterministic cache key for a query.
pub fn query_cache_key(query: &SearchQuery) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.canonical().as_bytes());
    hex::encode(hasher.finalize())
}
