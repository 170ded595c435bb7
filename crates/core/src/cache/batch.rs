//! Delayed batch write manager.
//!
//! Coalesces disk cache writes over a short window and flushes them in
//! batches, trading a small durability delay for drastically reduced I/O
//! volume. A flush is triggered by whichever comes first: the window
//! elapsing since the oldest unflushed entry, or the buffer reaching its
//! size threshold. Shutdown performs a final synchronous flush.
//!
//! The buffer lives inside a background task; all mutation flows through a
//! command channel, so flushes drain atomically and are safe against
//! concurrent enqueues.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::disk::{CacheDb, DiskWrite};
use crate::Error;

/// Commands for the batch writer background task.
enum Command {
    /// Buffer a write, merging last-write-wins on the key.
    Enqueue(DiskWrite),
    /// Force an immediate flush.
    Flush(oneshot::Sender<()>),
    /// Final flush, then stop.
    Shutdown(oneshot::Sender<()>),
}

/// Tuning knobs for the write manager.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Coalescing window measured from the oldest unflushed entry.
    pub interval: Duration,
    /// Buffer size that triggers an early flush.
    pub max_entries: usize,
    /// Disk size cap enforced after each flush, if any.
    pub max_bytes: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { interval: Duration::from_millis(500), max_entries: 64, max_bytes: None }
    }
}

/// Handle to the delayed batch write manager.
#[derive(Debug)]
pub struct BatchWriteManager {
    tx: mpsc::Sender<Command>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BatchWriteManager {
    /// Start the background writer task against the given disk cache.
    pub fn start(db: CacheDb, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        let handle = tokio::spawn(run_writer(db, config, rx));
        Self { tx, handle: parking_lot::Mutex::new(Some(handle)) }
    }

    /// Buffer a write for eventual persistence.
    ///
    /// Merges with any pending write for the same key (last write wins).
    ///
    /// # Errors
    ///
    /// Returns `Error::WriteManagerClosed` after shutdown has begun.
    pub async fn enqueue(&self, write: DiskWrite) -> Result<(), Error> {
        self.tx
            .send(Command::Enqueue(write))
            .await
            .map_err(|_| Error::WriteManagerClosed)
    }

    /// Flush the current buffer immediately and wait for it to persist.
    ///
    /// Idempotent; a concurrent enqueue lands in the next batch.
    pub async fn flush_now(&self) -> Result<(), Error> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .await
            .map_err(|_| Error::WriteManagerClosed)?;
        ack_rx.await.map_err(|_| Error::WriteManagerClosed)
    }

    /// Stop accepting enqueues, perform a final synchronous flush, and wait
    /// for the background task to exit.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutdownTimeout` if the final flush does not complete
    /// within `timeout`. Callers must treat this as data-loss risk to
    /// surface, not retry.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).await.is_err() {
            // Already shut down; nothing left to flush.
            return Ok(());
        }

        tokio::time::timeout(timeout, ack_rx)
            .await
            .map_err(|_| Error::ShutdownTimeout { timeout })?
            .map_err(|_| Error::ShutdownTimeout { timeout })?;

        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("batch writer task ended abnormally: {e}");
        }

        Ok(())
    }
}

async fn run_writer(db: CacheDb, config: BatchConfig, mut rx: mpsc::Receiver<Command>) {
    let mut buffer: HashMap<String, DiskWrite> = HashMap::new();
    let mut oldest: Option<Instant> = None;

    loop {
        let window_deadline = oldest.map(|t| t + config.interval);
        let window_elapsed = async move {
            match window_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Enqueue(write)) => {
                    if buffer.is_empty() {
                        oldest = Some(Instant::now());
                    }
                    buffer.insert(write.key.clone(), write);
                    if buffer.len() >= config.max_entries {
                        flush(&db, &config, &mut buffer, &mut oldest).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    flush(&db, &config, &mut buffer, &mut oldest).await;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    flush(&db, &config, &mut buffer, &mut oldest).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    flush(&db, &config, &mut buffer, &mut oldest).await;
                    break;
                }
            },
            _ = window_elapsed => {
                flush(&db, &config, &mut buffer, &mut oldest).await;
            }
        }
    }

    debug!("batch writer task stopped");
}

/// Drain the buffer and persist it as one transaction.
async fn flush(db: &CacheDb, config: &BatchConfig, buffer: &mut HashMap<String, DiskWrite>, oldest: &mut Option<Instant>) {
    *oldest = None;
    if buffer.is_empty() {
        return;
    }

    let writes: Vec<DiskWrite> = buffer.drain().map(|(_, w)| w).collect();
    let count = writes.len();

    if let Err(e) = db.put_entries(writes).await {
        // Entries are gone from the buffer; the memory tier still holds
        // them, so a later set() can re-enqueue. Surface and move on.
        warn!("batch flush of {count} entries failed: {e}");
        return;
    }
    debug!("flushed {count} cache entries to disk");

    if let Some(max_bytes) = config.max_bytes
        && let Err(e) = db.enforce_max_size(max_bytes).await
    {
        warn!("disk cache size enforcement failed: {e}");
    }
}
