//! # Work Scheduler
//!
//! The task-dispatch primitive the engine re-enqueues itself through. A
//! "continuing" job is never an in-process tail call: the orchestrator asks
//! the scheduler for a brand-new invocation with an advanced cursor and the
//! current invocation ends, which bounds every transaction to one page.
//!
//! Two implementations ship with the crate:
//!
//! - [`TokioScheduler`] dispatches work items onto spawned tokio tasks and
//!   tracks per-handle liveness in a concurrent map. Cancellation aborts the
//!   task, which prevents a future page from starting but does not interrupt
//!   a page already executing its transaction.
//! - [`ManualScheduler`] queues work items without executing them, letting
//!   tests and embedded drivers pump the queue deterministically.

use crate::error::{MigratorError, Result};
use crate::models::WorkerLiveness;
use crate::orchestration::types::RunRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// A unit of future work the engine schedules for itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkItem {
    /// Run one page of a migration job.
    RunPage(RunRequest),
    /// Continue a cancel-all sweep past the given name.
    CancelSweep {
        since: Option<DateTime<Utc>>,
        after: Option<String>,
    },
}

/// Handle to a scheduled worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerRef {
    pub id: Uuid,
}

impl WorkerRef {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for WorkerRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<Uuid> for WorkerRef {
    fn from(id: Uuid) -> Self {
        Self { id }
    }
}

/// Receives scheduled work items for execution. Implemented by the
/// orchestrator; the scheduler holds it weakly so queued work never keeps
/// the engine alive. The worker handle identifies the task executing the
/// item, letting a continuation recognize itself as the job's active worker.
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    async fn dispatch(&self, worker: WorkerRef, item: WorkItem) -> Result<()>;
}

/// External task-scheduling primitive: enqueue a unit of work, query the
/// liveness of its handle, revoke it.
#[async_trait]
pub trait WorkScheduler: Send + Sync {
    async fn schedule(&self, item: WorkItem) -> Result<WorkerRef>;

    /// Register the calling invocation as a live worker without enqueueing
    /// anything. A synchronous page run adopts a handle so concurrent
    /// invocations of the same job observe it through `liveness` exactly
    /// like a scheduled task; the caller must `settle` it when done.
    async fn adopt(&self) -> Result<WorkerRef>;

    /// Record the terminal outcome of a worker. Never overwrites `Canceled`.
    async fn settle(&self, worker: &WorkerRef, outcome: WorkerLiveness);

    async fn liveness(&self, worker: &WorkerRef) -> WorkerLiveness;

    /// Revoke a pending or running task. Revoking an already-settled or
    /// unknown handle is a no-op.
    async fn cancel(&self, worker: &WorkerRef) -> Result<()>;
}

struct TokioTask {
    handle: Option<tokio::task::JoinHandle<()>>,
    liveness: WorkerLiveness,
}

/// In-process scheduler backed by tokio tasks.
pub struct TokioScheduler {
    tasks: Arc<DashMap<Uuid, TokioTask>>,
    dispatcher: RwLock<Option<Weak<dyn WorkDispatcher>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            dispatcher: RwLock::new(None),
        }
    }

    /// Wire the dispatcher that executes scheduled items. Must be called
    /// before the first `schedule`.
    pub fn bind(&self, dispatcher: Weak<dyn WorkDispatcher>) {
        *self.dispatcher.write() = Some(dispatcher);
    }

    /// Wait for every currently-tracked task to settle. Test and shutdown
    /// helper; tasks scheduled by running tasks are waited on too.
    pub async fn quiesce(&self) {
        loop {
            let handles: Vec<tokio::task::JoinHandle<()>> = self
                .tasks
                .iter_mut()
                .filter_map(|mut entry| entry.handle.take())
                .collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                // Aborted and panicked tasks both settle; errors are
                // reflected in the liveness map, not here.
                let _ = handle.await;
            }
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn set_liveness(tasks: &DashMap<Uuid, TokioTask>, id: Uuid, liveness: WorkerLiveness) {
    if let Some(mut task) = tasks.get_mut(&id) {
        // A canceled task stays canceled even if its future briefly observes
        // completion while being torn down.
        if task.liveness != WorkerLiveness::Canceled {
            task.liveness = liveness;
        }
    }
}

/// Terminal write for a worker entry. `Finished` entries are evicted from
/// the map so the registry stays bounded by in-flight and failed work rather
/// than growing by one entry per page ever run; failed and canceled entries
/// are kept for liveness queries against stale `active_worker` handles.
fn settle_task(tasks: &DashMap<Uuid, TokioTask>, id: Uuid, outcome: WorkerLiveness) {
    let evict = match tasks.get_mut(&id) {
        Some(mut task) => {
            if task.liveness == WorkerLiveness::Canceled {
                false
            } else if outcome == WorkerLiveness::Finished {
                true
            } else {
                task.liveness = outcome;
                false
            }
        }
        None => false,
    };
    if evict {
        tasks.remove(&id);
    }
}

#[async_trait]
impl WorkScheduler for TokioScheduler {
    async fn schedule(&self, item: WorkItem) -> Result<WorkerRef> {
        let dispatcher = self
            .dispatcher
            .read()
            .clone()
            .ok_or_else(|| MigratorError::Scheduler("no dispatcher bound".to_string()))?;

        let worker = WorkerRef::new();
        let id = worker.id;
        let tasks = Arc::clone(&self.tasks);

        // The entry exists before the task starts so every liveness write
        // from inside the task lands.
        self.tasks.insert(
            id,
            TokioTask {
                handle: None,
                liveness: WorkerLiveness::Pending,
            },
        );

        let handle = tokio::spawn(async move {
            set_liveness(&tasks, id, WorkerLiveness::Running);
            let outcome = match dispatcher.upgrade() {
                Some(dispatcher) => dispatcher.dispatch(WorkerRef { id }, item).await,
                None => Err(MigratorError::Scheduler(
                    "dispatcher dropped before execution".to_string(),
                )),
            };
            match outcome {
                Ok(()) => settle_task(&tasks, id, WorkerLiveness::Finished),
                Err(e) => {
                    warn!(worker = %id, error = %e, "Scheduled work item failed");
                    settle_task(&tasks, id, WorkerLiveness::Failed);
                }
            }
        });

        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.handle = Some(handle);
        }
        debug!(worker = %id, "Scheduled work item");
        Ok(worker)
    }

    async fn adopt(&self) -> Result<WorkerRef> {
        let worker = WorkerRef::new();
        self.tasks.insert(
            worker.id,
            TokioTask {
                handle: None,
                liveness: WorkerLiveness::Running,
            },
        );
        Ok(worker)
    }

    async fn settle(&self, worker: &WorkerRef, outcome: WorkerLiveness) {
        settle_task(&self.tasks, worker.id, outcome);
    }

    async fn liveness(&self, worker: &WorkerRef) -> WorkerLiveness {
        match self.tasks.get(&worker.id) {
            Some(task) => {
                let settled = task
                    .handle
                    .as_ref()
                    .map(|h| h.is_finished())
                    .unwrap_or(false);
                match task.liveness {
                    // The spawned future sets its terminal liveness as its
                    // last action, so a finished handle still marked live
                    // means it was torn down mid-flight.
                    live if live.is_live() && settled => WorkerLiveness::Failed,
                    other => other,
                }
            }
            None => WorkerLiveness::Absent,
        }
    }

    async fn cancel(&self, worker: &WorkerRef) -> Result<()> {
        if let Some(mut task) = self.tasks.get_mut(&worker.id) {
            if task.liveness.is_live() {
                if let Some(handle) = task.handle.as_ref() {
                    handle.abort();
                }
                task.liveness = WorkerLiveness::Canceled;
                debug!(worker = %worker.id, "Canceled worker task");
            }
        }
        Ok(())
    }
}

/// Deterministic scheduler: work items queue up until the driver takes them.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(WorkerRef, WorkItem)>>,
    liveness: DashMap<Uuid, WorkerLiveness>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dequeue the next pending item and mark its worker running.
    pub fn take_next(&self) -> Option<(WorkerRef, WorkItem)> {
        let next = self.queue.lock().pop_front();
        if let Some((worker, _)) = &next {
            self.liveness.insert(worker.id, WorkerLiveness::Running);
        }
        next
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl WorkScheduler for ManualScheduler {
    async fn schedule(&self, item: WorkItem) -> Result<WorkerRef> {
        let worker = WorkerRef::new();
        self.liveness.insert(worker.id, WorkerLiveness::Pending);
        self.queue.lock().push_back((worker, item));
        Ok(worker)
    }

    async fn adopt(&self) -> Result<WorkerRef> {
        let worker = WorkerRef::new();
        self.liveness.insert(worker.id, WorkerLiveness::Running);
        Ok(worker)
    }

    async fn settle(&self, worker: &WorkerRef, outcome: WorkerLiveness) {
        if let Some(current) = self.liveness.get(&worker.id) {
            if *current == WorkerLiveness::Canceled {
                return;
            }
        }
        self.liveness.insert(worker.id, outcome);
    }

    async fn liveness(&self, worker: &WorkerRef) -> WorkerLiveness {
        self.liveness
            .get(&worker.id)
            .map(|l| *l)
            .unwrap_or(WorkerLiveness::Absent)
    }

    async fn cancel(&self, worker: &WorkerRef) -> Result<()> {
        self.queue.lock().retain(|(w, _)| w.id != worker.id);
        self.liveness.insert(worker.id, WorkerLiveness::Canceled);
        Ok(())
    }
}
