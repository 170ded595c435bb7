//! Sharded in-memory cache tier.
//!
//! The memory tier is one of the two mutable shared structures on the hot
//! path, so it is sharded: each key maps to one of 16 `RwLock`-protected
//! maps and concurrent distinct-query traffic does not serialize on a
//! single lock. Expiry is evaluated lazily at read time; there is no
//! background sweep.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

const SHARD_COUNT: usize = 16;

/// Which tiers currently hold an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    /// Present in memory only (disk disabled or write not yet flushed).
    Memory,
    /// Present in memory and on disk (written through or promoted).
    Both,
}

/// A cached payload with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub payload: Vec<u8>,
    pub ttl: Duration,
    pub written_at: DateTime<Utc>,
    pub level: CacheLevel,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
            .is_some_and(|expiry| now > expiry)
    }
}

/// Sharded memory cache.
#[derive(Debug)]
pub struct MemoryCache {
    shards: Vec<RwLock<HashMap<String, MemoryEntry>>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self { shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect() }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, MemoryEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Look up a payload. Expired entries are treated as misses and evicted.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();
        let shard = self.shard(key);

        let expired = {
            let map = shard.read();
            match map.get(key) {
                Some(entry) if entry.is_expired(now) => true,
                Some(entry) => return Some(entry.payload.clone()),
                None => return None,
            }
        };

        if expired {
            shard.write().remove(key);
        }
        None
    }

    /// Insert or replace an entry, stamping the write time.
    pub fn insert(&self, key: &str, payload: Vec<u8>, ttl: Duration, level: CacheLevel) {
        let entry = MemoryEntry { payload, ttl, written_at: Utc::now(), level };
        self.shard(key).write().insert(key.to_string(), entry);
    }

    /// Insert an entry with an explicit write time.
    ///
    /// Used when promoting a disk hit: the disk row's original timestamp is
    /// preserved so the memory copy cannot outlive the entry's TTL.
    pub fn insert_entry(&self, key: &str, entry: MemoryEntry) {
        self.shard(key).write().insert(key.to_string(), entry);
    }

    /// Number of live (possibly expired-but-unswept) entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Snapshot all non-expired entries, for the shutdown flush to disk.
    pub fn snapshot(&self) -> Vec<(String, MemoryEntry)> {
        let now = Utc::now();
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, e)| (k.clone(), e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

}
