//! Bounded async task pool.
//!
//! Each dispatched backend query runs as an independently cancellable unit
//! of work. Two semaphores bound the pool: pending permits cap
//! queued-plus-running tasks (fail-fast backpressure, `QueueFull`), and
//! worker permits cap how many run at once. A pool-level timeout bounds how
//! long abandoned background tasks may run before being dropped.
//!
//! Task state machine: `Queued -> Running -> {Completed | Failed |
//! TimedOut | Cancelled}`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Semaphore, TryAcquireError, mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use fansearch_core::{Error, SearchResult};

use crate::backend::BackendError;

/// Pool sizing and timeout knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent worker slots.
    pub max_workers: usize,
    /// Queued-plus-running ceiling; submissions beyond it are rejected.
    pub max_pending: usize,
    /// Execution ceiling per task once it holds a worker slot.
    pub task_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_workers: 20, max_pending: 100, task_timeout: Duration::from_secs(30) }
    }
}

/// Observable task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Terminal outcome delivered to the completion channel.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The backend produced its ordered result sequence.
    Completed(Vec<SearchResult>),
    /// The backend failed; logged and excluded from aggregation.
    Failed(BackendError),
    /// The pool-level ceiling elapsed; the task is abandoned and excluded.
    TimedOut,
    /// Cancelled before or during execution.
    Cancelled,
}

/// A completed task report.
#[derive(Debug)]
pub struct TaskCompletion {
    pub source: String,
    pub priority: i32,
    pub outcome: TaskOutcome,
}

/// A single (query, backend) pairing submitted to the pool.
pub struct SearchTask {
    /// Originating backend name, carried through to the completion report.
    pub source: String,
    /// Merge priority of the source.
    pub priority: i32,
    /// The type-erased backend execution.
    pub fut: BoxFuture<'static, Result<Vec<SearchResult>, BackendError>>,
}

/// Handle to a submitted task: state observation and best-effort
/// cancellation. Dropping the handle does NOT cancel the task; background
/// continuation after the client response depends on that.
#[derive(Debug)]
pub struct TaskHandle {
    state: watch::Receiver<TaskState>,
    cancel: watch::Sender<bool>,
}

impl TaskHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Wait until the task reaches a terminal state.
    pub async fn terminal_state(&mut self) -> TaskState {
        loop {
            let state = *self.state.borrow();
            if !matches!(state, TaskState::Queued | TaskState::Running) {
                return state;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }

    /// Signal cancellation. Best-effort: the in-flight backend call stops at
    /// its next suspension point, never forcibly mid-operation.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Fixed-size worker pool with a bounded pending-task queue.
pub struct TaskPool {
    workers: Arc<Semaphore>,
    pending: Arc<Semaphore>,
    max_pending: usize,
    task_timeout: Duration,
}

impl TaskPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            pending: Arc::new(Semaphore::new(config.max_pending.max(1))),
            max_pending: config.max_pending.max(1),
            task_timeout: config.task_timeout,
        }
    }

    /// Submit a task for execution.
    ///
    /// The completion report is delivered on `completions` whenever the task
    /// reaches a terminal state, whether or not the caller is still waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueueFull` when queued-plus-running tasks would
    /// exceed the configured maximum. Callers treat this as "backend
    /// skipped for this query", not a fatal error.
    pub fn submit(&self, task: SearchTask, completions: mpsc::Sender<TaskCompletion>) -> Result<TaskHandle, Error> {
        let pending_permit = match self.pending.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                return Err(Error::QueueFull { max: self.max_pending });
            }
        };

        let (state_tx, state_rx) = watch::channel(TaskState::Queued);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let workers = Arc::clone(&self.workers);
        let task_timeout = self.task_timeout;

        tokio::spawn(run_task(task, workers, task_timeout, pending_permit, state_tx, cancel_rx, completions));

        Ok(TaskHandle { state: state_rx, cancel: cancel_tx })
    }

    /// Worker slots currently free.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Pending-queue slots currently free.
    pub fn available_pending(&self) -> usize {
        self.pending.available_permits()
    }
}

async fn run_task(
    task: SearchTask, workers: Arc<Semaphore>, task_timeout: Duration,
    pending_permit: tokio::sync::OwnedSemaphorePermit, state_tx: watch::Sender<TaskState>,
    mut cancel_rx: watch::Receiver<bool>, completions: mpsc::Sender<TaskCompletion>,
) {
    // Holds a queued-or-running slot for the task's whole lifetime.
    let _pending_permit = pending_permit;
    let queued_at = Instant::now();

    let worker_permit = tokio::select! {
        permit = workers.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = cancelled(&mut cancel_rx) => {
            let _ = state_tx.send(TaskState::Cancelled);
            let _ = completions
                .send(TaskCompletion { source: task.source, priority: task.priority, outcome: TaskOutcome::Cancelled })
                .await;
            return;
        }
    };

    let _ = state_tx.send(TaskState::Running);
    debug!(source = %task.source, queued_ms = queued_at.elapsed().as_millis() as u64, "task started");

    let (state, outcome) = tokio::select! {
        result = tokio::time::timeout(task_timeout, task.fut) => match result {
            Ok(Ok(results)) => (TaskState::Completed, TaskOutcome::Completed(results)),
            Ok(Err(e)) => (TaskState::Failed, TaskOutcome::Failed(e)),
            Err(_) => (TaskState::TimedOut, TaskOutcome::TimedOut),
        },
        _ = cancelled(&mut cancel_rx) => (TaskState::Cancelled, TaskOutcome::Cancelled),
    };

    drop(worker_permit);
    let _ = state_tx.send(state);
    let _ = completions
        .send(TaskCompletion { source: task.source, priority: task.priority, outcome })
        .await;
}

/// Resolves once cancellation is signalled; pends forever if the handle was
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
