//! SQLite-backed disk cache tier.
//!
//! Wraps a tokio-rusqlite connection that runs database operations on a
//! background thread. The store is a key -> (payload, ttl, timestamp) table;
//! expired rows are skipped and lazily removed on access, and total payload
//! size is kept under the configured cap by deleting the oldest rows.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, params};

use super::migrations;
use crate::Error;

/// A single row to persist, carrying its original write time so batch and
/// shutdown flushes do not extend entry lifetimes.
#[derive(Debug, Clone)]
pub struct DiskWrite {
    pub key: String,
    pub payload: Vec<u8>,
    pub ttl: Duration,
    pub written_at: DateTime<Utc>,
}

impl DiskWrite {
    /// A write stamped now.
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        Self { key: key.into(), payload, ttl, written_at: Utc::now() }
    }

    fn expires_at(&self) -> String {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.written_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .to_rfc3339()
    }
}

/// A row read back from disk.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub payload: Vec<u8>,
    pub ttl: Duration,
    pub written_at: DateTime<Utc>,
}

/// Disk cache database handle.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file (and parent directory) if missing, applies
    /// performance pragmas, and runs any pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `Error::DiskUnavailable` if the database cannot be opened;
    /// the caller is expected to degrade to memory-only operation.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::DiskUnavailable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).await.map_err(|e| Error::DiskUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Self::configure(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;

        Self::configure(conn).await
    }

    async fn configure(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }

    /// Get an entry by key.
    ///
    /// Returns `None` on a miss. An expired row counts as a miss and is
    /// deleted in the same call.
    pub async fn get_entry(&self, key: &str) -> Result<Option<DiskEntry>, Error> {
        let key = key.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Option<DiskEntry>, Error> {
                let mut stmt =
                    conn.prepare("SELECT payload, ttl_secs, written_at, expires_at FROM entries WHERE key = ?1")?;

                let row = stmt.query_row(params![key], |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                });

                let (payload, ttl_secs, written_at, expires_at) = match row {
                    Ok(values) => values,
                    Err(tokio_rusqlite::rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                if expires_at <= now {
                    conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
                    return Ok(None);
                }

                let written_at = DateTime::parse_from_rfc3339(&written_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());

                Ok(Some(DiskEntry {
                    payload,
                    ttl: Duration::from_secs(ttl_secs.max(0) as u64),
                    written_at,
                }))
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or update a single entry.
    pub async fn put_entry(&self, write: DiskWrite) -> Result<(), Error> {
        self.put_entries(vec![write]).await
    }

    /// Insert or update a batch of entries in one transaction.
    pub async fn put_entries(&self, writes: Vec<DiskWrite>) -> Result<(), Error> {
        if writes.is_empty() {
            return Ok(());
        }

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO entries (key, payload, ttl_secs, written_at, expires_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(key) DO UPDATE SET
                            payload = excluded.payload,
                            ttl_secs = excluded.ttl_secs,
                            written_at = excluded.written_at,
                            expires_at = excluded.expires_at",
                    )?;
                    for write in &writes {
                        stmt.execute(params![
                            write.key,
                            write.payload,
                            write.ttl.as_secs() as i64,
                            write.written_at.to_rfc3339(),
                            write.expires_at(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired entries. Returns the number of deleted rows.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete oldest entries until total payload size fits under `max_bytes`.
    ///
    /// Returns the number of deleted rows. Per-entry TTLs are unaffected:
    /// eviction only ever removes rows early, never extends them.
    pub async fn enforce_max_size(&self, max_bytes: u64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM entries", [], |row| row.get(0))?;
                if total as u64 <= max_bytes {
                    return Ok(0);
                }

                let mut to_free = total as u64 - max_bytes;
                let mut victims: Vec<String> = Vec::new();
                {
                    let mut stmt =
                        conn.prepare("SELECT key, LENGTH(payload) FROM entries ORDER BY written_at ASC")?;
                    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
                    for row in rows {
                        let (key, size) = row?;
                        victims.push(key);
                        let size = size.max(0) as u64;
                        if size >= to_free {
                            break;
                        }
                        to_free -= size;
                    }
                }

                let mut deleted = 0u64;
                for key in victims {
                    deleted += conn.execute("DELETE FROM entries WHERE key = ?1", params![key])? as u64;
                }
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of rows currently stored, including not-yet-swept expired ones.
    pub async fn len(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(DiskWrite::new("k1", b"payload".to_vec(), Duration::from_secs(3600)))
            .await
            .unwrap();

        let entry = db.get_entry("k1").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"payload");
        assert_eq!(entry.ttl, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_lazily_removed() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let write = DiskWrite {
            key: "old".into(),
            payload: b"v".to_vec(),
            ttl: Duration::from_secs(60),
            written_at: Utc::now() - chrono::Duration::seconds(120),
        };
        db.put_entry(write).await.unwrap();

        assert!(db.get_entry("old").await.unwrap().is_none());
        assert_eq!(db.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(DiskWrite::new("k", b"old".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();
        db.put_entry(DiskWrite::new("k", b"new".to_vec(), Duration::from_secs(60)))
            .await
            .unwrap();

        let entry = db.get_entry("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"new");
        assert_eq!(db.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_put_is_atomic() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let writes = (0..10)
            .map(|i| DiskWrite::new(format!("k{i}"), vec![i as u8], Duration::from_secs(60)))
            .collect();
        db.put_entries(writes).await.unwrap();
        assert_eq!(db.len().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(DiskWrite {
            key: "dead".into(),
            payload: b"v".to_vec(),
            ttl: Duration::from_secs(1),
            written_at: Utc::now() - chrono::Duration::seconds(10),
        })
        .await
        .unwrap();
        db.put_entry(DiskWrite::new("live", b"v".to_vec(), Duration::from_secs(3600)))
            .await
            .unwrap();

        let purged = db.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_entry("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enforce_max_size_deletes_oldest() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for i in 0..4 {
            db.put_entry(DiskWrite {
                key: format!("k{i}"),
                payload: vec![0u8; 100],
                ttl: Duration::from_secs(3600),
                written_at: Utc::now() - chrono::Duration::seconds(100 - i),
            })
            .await
            .unwrap();
        }

        // 400 bytes stored; cap at 250 forces the two oldest out.
        let deleted = db.enforce_max_size(250).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(db.get_entry("k0").await.unwrap().is_none());
        assert!(db.get_entry("k1").await.unwrap().is_none());
        assert!(db.get_entry("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enforce_max_size_noop_under_cap() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry(DiskWrite::new("k", vec![0u8; 10], Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(db.enforce_max_size(1024).await.unwrap(), 0);
    }
}
