//! Two-level cache façade.
//!
//! Reads check memory first, then disk; a disk hit is promoted into memory
//! before returning. Writes go to memory synchronously and to disk
//! asynchronously through the batch write manager. If the disk tier cannot
//! be opened the cache degrades to memory-only operation, logged once.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use super::batch::{BatchConfig, BatchWriteManager};
use super::disk::{CacheDb, DiskWrite};
use super::memory::{CacheLevel, MemoryCache, MemoryEntry};
use crate::Error;

/// The two-level (memory + disk) search result cache.
#[derive(Debug)]
pub struct SearchCache {
    memory: MemoryCache,
    disk: Option<CacheDb>,
    writer: Option<BatchWriteManager>,
}

impl SearchCache {
    /// Open the cache with a disk tier at `path`.
    ///
    /// A disk open failure is not fatal: the cache degrades to memory-only
    /// and the condition is logged once.
    pub async fn open(path: impl AsRef<Path>, batch: BatchConfig) -> Self {
        match CacheDb::open(path).await {
            Ok(db) => {
                let writer = BatchWriteManager::start(db.clone(), batch);
                Self { memory: MemoryCache::new(), disk: Some(db), writer: Some(writer) }
            }
            Err(e) => {
                warn!("disk cache degraded to memory-only: {e}");
                Self::memory_only()
            }
        }
    }

    /// A memory-only cache (disk tier disabled or unavailable).
    pub fn memory_only() -> Self {
        Self { memory: MemoryCache::new(), disk: None, writer: None }
    }

    /// Whether the disk tier is active.
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    /// Look up a payload: memory first, then disk with promotion.
    ///
    /// Disk errors degrade to a miss; expiry is handled lazily by each tier.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(payload) = self.memory.get(key) {
            return Some(payload);
        }

        let disk = self.disk.as_ref()?;
        match disk.get_entry(key).await {
            Ok(Some(entry)) => {
                self.memory.insert_entry(
                    key,
                    MemoryEntry {
                        payload: entry.payload.clone(),
                        ttl: entry.ttl,
                        written_at: entry.written_at,
                        level: CacheLevel::Both,
                    },
                );
                debug!("promoted disk cache entry into memory: {key}");
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("disk cache read failed for {key}: {e}");
                None
            }
        }
    }

    /// Write to memory synchronously and enqueue the disk write.
    pub async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        let write = DiskWrite::new(key, payload.clone(), ttl);
        let level = if self.disk.is_some() { CacheLevel::Both } else { CacheLevel::Memory };
        self.memory.insert_entry(
            key,
            MemoryEntry { payload, ttl, written_at: write.written_at, level },
        );

        if let Some(writer) = &self.writer
            && let Err(e) = writer.enqueue(write).await
        {
            debug!("disk write for {key} dropped: {e}");
        }
    }

    /// Write to memory and force an immediate, non-batched disk write.
    ///
    /// Used for externally-driven cache population where the caller needs
    /// the entry durable before continuing.
    pub async fn set_both_levels(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        let write = DiskWrite::new(key, payload.clone(), ttl);
        let level = if self.disk.is_some() { CacheLevel::Both } else { CacheLevel::Memory };
        self.memory.insert_entry(
            key,
            MemoryEntry { payload, ttl, written_at: write.written_at, level },
        );

        match &self.disk {
            Some(db) => db.put_entry(write).await,
            None => Ok(()),
        }
    }

    /// Number of entries in the memory tier.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Drain the write buffer, then sweep the memory tier to disk.
    ///
    /// Called once from the process shutdown path. Guarantees at-least-once
    /// persistence of every acknowledged write when it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutdownTimeout` if the batch drain cannot complete
    /// within `timeout`; the memory sweep is still attempted first so the
    /// caller can report the narrowest possible loss window.
    pub async fn flush_and_shutdown(&self, timeout: Duration) -> Result<(), Error> {
        let drained = match &self.writer {
            Some(writer) => writer.shutdown(timeout).await,
            None => Ok(()),
        };

        if let Some(db) = &self.disk {
            let writes: Vec<DiskWrite> = self
                .memory
                .snapshot()
                .into_iter()
                .map(|(key, entry)| DiskWrite {
                    key,
                    payload: entry.payload,
                    ttl: entry.ttl,
                    written_at: entry.written_at,
                })
                .collect();
            let count = writes.len();
            if let Err(e) = db.put_entries(writes).await {
                warn!("final memory-to-disk sweep of {count} entries failed: {e}");
            }
        }

        drained
    }
}
