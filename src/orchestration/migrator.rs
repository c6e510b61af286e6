//! # Migrator
//!
//! The orchestration state machine. One `run_page` invocation validates its
//! input, reconciles the requested cursor against persisted state, claims
//! the job as its live worker, processes exactly one page inside one
//! collection transaction, persists the merged job state, and decides the
//! next action: reschedule itself with the advanced cursor, chain to the
//! next job in a series, or stop.
//!
//! "Continuing" a job is always a fresh unit of work enqueued through the
//! [`WorkScheduler`], never an in-process tail call, which bounds the
//! transactional footprint of any invocation to one page and makes every
//! resume an explicit, idempotent re-invocation from the persisted cursor.
//!
//! ## Single live worker
//!
//! Before any page runs, the invocation persists itself as the job's
//! `active_worker` with one version-guarded compare-and-update. Concurrent
//! starts of the same job name either observe the live worker and defer, or
//! lose that claim write and defer; exactly one invocation processes the
//! page. Page progress and error persistence are likewise single-attempt
//! writes — a lost write is a lost race and is never reapplied onto the
//! winner's state.

use crate::config::MigratorConfig;
use crate::error::{MigratorError, Result};
use crate::logging::{log_error, log_job_operation};
use crate::models::{JobState, JobStatus, MigrationState, WorkerLiveness};
use crate::orchestration::page_processor::PageProcessor;
use crate::orchestration::status_projector::project_status;
use crate::orchestration::types::{CursorArg, RunRequest, SeriesLink};
use crate::registry::TransformRegistry;
use crate::scheduler::{TokioScheduler, WorkDispatcher, WorkItem, WorkScheduler, WorkerRef};
use crate::store::{CollectionStore, JobStore};
use crate::transform::Transform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// The batch-migration engine.
pub struct Migrator {
    config: MigratorConfig,
    registry: TransformRegistry,
    jobs: Arc<dyn JobStore>,
    collection: Arc<dyn CollectionStore>,
    scheduler: Arc<dyn WorkScheduler>,
}

impl Migrator {
    pub fn new(
        config: MigratorConfig,
        registry: TransformRegistry,
        jobs: Arc<dyn JobStore>,
        collection: Arc<dyn CollectionStore>,
        scheduler: Arc<dyn WorkScheduler>,
    ) -> Self {
        Self {
            config,
            registry,
            jobs,
            collection,
            scheduler,
        }
    }

    /// Construct an engine wired to an in-process [`TokioScheduler`] so
    /// scheduled pages dispatch back into this engine.
    pub fn with_tokio_scheduler(
        config: MigratorConfig,
        registry: TransformRegistry,
        jobs: Arc<dyn JobStore>,
        collection: Arc<dyn CollectionStore>,
    ) -> (Arc<Self>, Arc<TokioScheduler>) {
        let scheduler = Arc::new(TokioScheduler::new());
        let migrator = Arc::new(Self::new(
            config,
            registry,
            jobs,
            collection,
            scheduler.clone(),
        ));
        scheduler.bind(Arc::downgrade(&migrator) as Weak<dyn WorkDispatcher>);
        (migrator, scheduler)
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Run one page of a migration job and decide what happens next.
    ///
    /// Returns the freshly computed [`JobStatus`]. Page-level failures are
    /// persisted on the job and surface through `error`/`Failed` in the
    /// returned status rather than unwinding; configuration errors, unknown
    /// transforms, and dry-run failures return `Err` directly.
    pub async fn run_page(&self, request: RunRequest) -> Result<JobStatus> {
        let batch_size = match request.batch_size {
            Some(b) if b <= 0 => {
                return Err(MigratorError::Configuration(format!(
                    "batch_size must be positive, got {b}"
                )))
            }
            Some(b) => b,
            None => self.config.default_batch_size,
        };
        // Resolve before touching any state so an unknown reference never
        // creates a job row.
        let transform = self.registry.resolve(&request.transform_ref).await?;
        let name = self.config.qualified_name(&request.name);

        // Step 1: load or create job state.
        let initial_cursor = match &request.cursor {
            CursorArg::At(token) => Some(token.clone()),
            _ => None,
        };
        let mut state = match self.jobs.get(&name).await? {
            Some(state) => state,
            None if request.dry_run => JobState::new(name.clone(), initial_cursor),
            None => {
                self.jobs
                    .get_or_create(JobState::new(name.clone(), initial_cursor))
                    .await?
            }
        };

        // One live worker per job: anyone who is not that worker defers to
        // it with a silent no-op.
        let is_own_continuation =
            request.worker.is_some() && request.worker == state.active_worker;
        if !is_own_continuation && !state.is_done {
            let liveness = self.worker_liveness(&state).await;
            if liveness.is_live() {
                debug!(job = %name, "Duplicate start detected, deferring to live worker");
                return Ok(JobStatus::from_state(&state, MigrationState::InProgress)
                    .with_batch_size(batch_size));
            }
        }

        // Step 2: reconcile the requested cursor. The reconciled state is
        // persisted together with the worker claim below; dry runs keep it
        // in memory only.
        if let Some(wanted) = request.cursor.requested() {
            let restart = request.cursor == CursorArg::Reset
                && (state.is_done || state.processed > 0 || state.cursor.is_some());
            if wanted != state.cursor || restart {
                info!(
                    job = %name,
                    requested = ?wanted,
                    persisted = ?state.cursor,
                    "Cursor differs from persisted state, starting new lineage"
                );
                state.reset_lineage(wanted);
            }
        }

        // Step 3 (done short-circuit): a completed job is idempotent; no
        // page runs and `processed` never moves.
        if state.is_done {
            let next = self.series_names(&request.series_remainder);
            if !request.dry_run {
                if state.active_worker.is_some() {
                    state = self
                        .persist_with(&name, state, |s| s.active_worker = None)
                        .await?;
                }
                self.advance_series(&request).await?;
            }
            return Ok(JobStatus::from_state(&state, MigrationState::Success)
                .with_batch_size(batch_size)
                .with_next(next));
        }

        if request.dry_run {
            return self
                .preview_page(&request, state, &transform, &name, batch_size)
                .await;
        }

        // Claim the job before any page work. Scheduled continuations are
        // already the persisted active worker; synchronous invocations
        // adopt a handle so concurrent starts observe them as live. Losing
        // this write means another invocation owns the job: defer.
        let (worker, adopted) = match request.worker {
            Some(id) => (WorkerRef::from(id), false),
            None => (self.scheduler.adopt().await?, true),
        };
        let mut claim = state;
        claim.active_worker = Some(worker.id);
        let state = match self.jobs.update(claim).await? {
            Some(state) => state,
            None => {
                if adopted {
                    self.scheduler.settle(&worker, WorkerLiveness::Finished).await;
                }
                debug!(job = %name, "Lost worker claim, deferring to concurrent invocation");
                return self.raced_status(&name, batch_size).await;
            }
        };

        let result = self
            .run_claimed_page(&request, state, batch_size, &transform, &name)
            .await;
        if adopted {
            let outcome = match &result {
                Ok(_) => WorkerLiveness::Finished,
                Err(_) => WorkerLiveness::Failed,
            };
            self.scheduler.settle(&worker, outcome).await;
        }
        result
    }

    /// Steps 3–5 once the invocation holds the worker claim: process one
    /// page in one transaction, persist the outcome, choose the next action.
    async fn run_claimed_page(
        &self,
        request: &RunRequest,
        state: JobState,
        batch_size: i64,
        transform: &Arc<dyn Transform>,
        name: &str,
    ) -> Result<JobStatus> {
        let processor = PageProcessor::new(self.config.parallel_pages);
        let mut tx = self.collection.begin().await?;
        let outcome = processor
            .process(
                tx.as_mut(),
                transform,
                name,
                state.cursor.as_deref(),
                batch_size,
            )
            .await;

        let page = match outcome {
            Err(e) => {
                tx.rollback().await?;
                warn!(job = %name, error = %e, "Page failed; recursion stops until re-invoked");
                let message = e.to_string();
                log_error("migrator", "run_page", &message, Some(name));
                let mut failed = state;
                failed.active_worker = None;
                failed.error = Some(message);
                let Some(state) = self.jobs.update(failed).await? else {
                    warn!(job = %name, "Lost job-state write after page failure, deferring to new owner");
                    return self.raced_status(name, batch_size).await;
                };
                log_job_operation(
                    "run_page",
                    name,
                    state.cursor.as_deref(),
                    Some(state.processed),
                    "failed",
                    state.error.as_deref(),
                );
                return Ok(JobStatus::from_state(&state, MigrationState::Failed)
                    .with_batch_size(batch_size));
            }
            Ok(page) => page,
        };

        tx.commit().await?;
        // Single-attempt write: a version conflict here means another
        // invocation claimed the job over us (crash-recovery takeover); its
        // view of the row wins and this result is reported as the race.
        let mut merged = state;
        merged.merge_page(&page);
        merged.active_worker = None;
        let Some(state) = self.jobs.update(merged).await? else {
            warn!(job = %name, "Lost page-merge write, deferring to new owner");
            return self.raced_status(name, batch_size).await;
        };
        log_job_operation(
            "run_page",
            name,
            state.cursor.as_deref(),
            Some(state.processed),
            if state.is_done { "done" } else { "advanced" },
            None,
        );

        // Step 4: decide the next action.
        if request.single_page_only {
            let projected = if state.is_done {
                MigrationState::Success
            } else {
                MigrationState::InProgress
            };
            return Ok(JobStatus::from_state(&state, projected)
                .with_batch_size(batch_size)
                .with_next(self.series_names(&request.series_remainder)));
        }

        if !state.is_done {
            let continuation = RunRequest::new(&request.transform_ref)
                .with_name(&request.name)
                .with_cursor(match &state.cursor {
                    Some(token) => CursorArg::At(token.clone()),
                    None => CursorArg::Unset,
                })
                .with_series(request.series_remainder.clone());
            let continuation = RunRequest {
                batch_size: request.batch_size,
                ..continuation
            };
            let worker = self
                .scheduler
                .schedule(WorkItem::RunPage(continuation))
                .await?;
            let state = self
                .persist_with(name, state, move |s| {
                    if !s.is_done && s.active_worker.is_none() {
                        s.active_worker = Some(worker.id);
                    }
                })
                .await?;
            return Ok(JobStatus::from_state(&state, MigrationState::InProgress)
                .with_batch_size(batch_size)
                .with_next(self.series_names(&request.series_remainder)));
        }

        // Done: advance the series past already-completed jobs.
        let next = self.series_names(&request.series_remainder);
        self.advance_series(request).await?;
        Ok(JobStatus::from_state(&state, MigrationState::Success)
            .with_batch_size(batch_size)
            .with_next(next))
    }

    /// Execute one page in a transaction that is discarded unconditionally,
    /// returning the would-be status. Job state is never persisted, not
    /// even row creation.
    async fn preview_page(
        &self,
        request: &RunRequest,
        state: JobState,
        transform: &Arc<dyn Transform>,
        name: &str,
        batch_size: i64,
    ) -> Result<JobStatus> {
        let processor = PageProcessor::new(self.config.parallel_pages);
        let mut tx = self.collection.begin().await?;
        let outcome = processor
            .process(
                tx.as_mut(),
                transform,
                name,
                state.cursor.as_deref(),
                batch_size,
            )
            .await;
        tx.rollback().await?;
        // A failing preview is a genuine failure to the caller; nothing was
        // persisted, so nothing to record.
        let page = outcome?;

        let mut preview = state;
        preview.merge_page(&page);
        preview.active_worker = None;
        let projected = if preview.is_done {
            MigrationState::Success
        } else {
            MigrationState::InProgress
        };
        debug!(job = %name, processed = page.records_processed, "Dry run complete, all changes discarded");
        Ok(JobStatus::from_state(&preview, projected)
            .with_batch_size(batch_size)
            .with_next(self.series_names(&request.series_remainder)))
    }

    /// Preview one page without committing anything: a convenience for
    /// `run_page` with `dry_run = true`.
    pub async fn dry_run(&self, request: RunRequest) -> Result<JobStatus> {
        self.run_page(request.dry_run(true)).await
    }

    /// Chain a list of jobs, running them in order. Jobs already done are
    /// skipped; a job already in progress no-ops the whole remaining chain;
    /// a failure or cancellation halts the chain.
    pub async fn run_series(&self, jobs: Vec<SeriesLink>) -> Result<Option<JobStatus>> {
        let Some((first, rest)) = jobs.split_first() else {
            return Ok(None);
        };
        let request = RunRequest::new(&first.transform_ref)
            .with_name(&first.name)
            .with_series(rest.to_vec());
        self.run_page(request).await.map(Some)
    }

    /// Drive a job synchronously to completion, one page per invocation,
    /// feeding each returned cursor back in. Built entirely on `run_page`
    /// with `single_page_only`; introduces no new state.
    pub async fn run_to_completion(&self, request: RunRequest) -> Result<JobStatus> {
        if request.dry_run {
            return self.run_page(request).await;
        }
        let mut cursor = request.cursor.clone();
        loop {
            let status = self
                .run_page(
                    request
                        .clone()
                        .with_cursor(cursor)
                        .single_page(true),
                )
                .await?;
            if status.is_done || status.error.is_some() {
                return Ok(status);
            }
            cursor = match &status.cursor {
                Some(token) => CursorArg::At(token.clone()),
                None => CursorArg::Unset,
            };
        }
    }

    /// Cancel a job's live worker, if any. Canceling a completed job is a
    /// no-op returning its status unchanged; cursor and counters are never
    /// touched, so a later re-invocation resumes from the last committed
    /// page.
    pub async fn cancel(&self, name: &str) -> Result<JobStatus> {
        let qualified = self.config.qualified_name(name);
        let Some(state) = self.jobs.get(&qualified).await? else {
            return Ok(JobStatus::unknown(qualified));
        };
        self.cancel_state(state).await
    }

    /// Cancel every not-done job, optionally filtered by creation time.
    /// Processes one bounded page synchronously and self-continues through
    /// the scheduler for the rest.
    pub async fn cancel_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<JobStatus>> {
        self.cancel_sweep(since, None).await
    }

    pub(crate) async fn cancel_sweep(
        &self,
        since: Option<DateTime<Utc>>,
        after: Option<String>,
    ) -> Result<Vec<JobStatus>> {
        let page = self
            .jobs
            .list_not_done(since, after.as_deref(), self.config.cancel_page_size)
            .await?;
        let full_page = page.len() as i64 == self.config.cancel_page_size;
        let last_name = page.last().map(|s| s.name.clone());

        let mut results = Vec::with_capacity(page.len());
        for state in page {
            results.push(self.cancel_state(state).await?);
        }

        if full_page {
            self.scheduler
                .schedule(WorkItem::CancelSweep {
                    since,
                    after: last_name,
                })
                .await?;
        }
        Ok(results)
    }

    async fn cancel_state(&self, state: JobState) -> Result<JobStatus> {
        if state.is_done {
            return Ok(JobStatus::from_state(&state, MigrationState::Success));
        }
        if let Some(worker) = state.active_worker {
            self.scheduler.cancel(&WorkerRef::from(worker)).await?;
            info!(job = %state.name, worker = %worker, "Canceled live worker");
        }
        let liveness = self.worker_liveness(&state).await;
        Ok(JobStatus::from_state(
            &state,
            project_status(Some(&state), liveness),
        ))
    }

    /// Status query: one entry per requested name (synthesizing `unknown`
    /// for names never run), or the most recently started jobs when no
    /// names are given.
    pub async fn status(
        &self,
        names: Option<Vec<String>>,
        limit: Option<i64>,
    ) -> Result<Vec<JobStatus>> {
        match names {
            Some(names) => {
                let mut statuses = Vec::with_capacity(names.len());
                for name in names {
                    let qualified = self.config.qualified_name(&name);
                    let status = match self.jobs.get(&qualified).await? {
                        Some(state) => {
                            let liveness = self.worker_liveness(&state).await;
                            JobStatus::from_state(&state, project_status(Some(&state), liveness))
                        }
                        None => JobStatus::unknown(qualified),
                    };
                    statuses.push(status);
                }
                Ok(statuses)
            }
            None => {
                let limit = limit.unwrap_or(self.config.status_limit);
                let states = self.jobs.list_recent(limit).await?;
                let mut statuses = Vec::with_capacity(states.len());
                for state in states {
                    let liveness = self.worker_liveness(&state).await;
                    statuses.push(JobStatus::from_state(
                        &state,
                        project_status(Some(&state), liveness),
                    ));
                }
                Ok(statuses)
            }
        }
    }

    /// Delete terminal job rows older than the cutoff, paging internally
    /// until none remain. Returns the number of rows removed.
    pub async fn clear_all(&self, before: Option<DateTime<Utc>>) -> Result<u64> {
        let mut total = 0;
        loop {
            let deleted = self
                .jobs
                .delete_done_before(before, self.config.cancel_page_size)
                .await?;
            total += deleted;
            if deleted == 0 {
                break;
            }
        }
        info!(deleted = total, "Cleared terminal job state rows");
        Ok(total)
    }

    async fn worker_liveness(&self, state: &JobState) -> WorkerLiveness {
        match state.active_worker {
            Some(id) => self.scheduler.liveness(&WorkerRef::from(id)).await,
            None => WorkerLiveness::Absent,
        }
    }

    /// Status of a job that another invocation won a write race for: the
    /// stored row is the winner's, and this invocation reports it as-is.
    async fn raced_status(&self, name: &str, batch_size: i64) -> Result<JobStatus> {
        let Some(state) = self.jobs.get(name).await? else {
            return Ok(JobStatus::unknown(name));
        };
        let liveness = self.worker_liveness(&state).await;
        Ok(
            JobStatus::from_state(&state, project_status(Some(&state), liveness))
                .with_batch_size(batch_size),
        )
    }

    /// Compare-and-update with reload-and-reapply on version conflicts.
    /// Only for pure worker-handle bookkeeping: page progress and error
    /// writes must never be reapplied onto a row another invocation owns,
    /// so they use single-attempt updates instead.
    async fn persist_with(
        &self,
        name: &str,
        base: JobState,
        apply: impl Fn(&mut JobState) + Send,
    ) -> Result<JobState> {
        let mut state = base;
        loop {
            apply(&mut state);
            match self.jobs.update(state).await? {
                Some(updated) => return Ok(updated),
                None => {
                    state = self.jobs.get(name).await?.ok_or_else(|| {
                        MigratorError::Store(format!("job state vanished mid-update: {name}"))
                    })?;
                }
            }
        }
    }

    fn series_names(&self, series: &[SeriesLink]) -> Vec<String> {
        series
            .iter()
            .map(|link| self.config.qualified_name(&link.name))
            .collect()
    }

    /// Scan the series remainder for the first job not yet done and kick it
    /// off, threading the rest of the series onward. Jobs already done are
    /// skipped without side effects; a job already in progress no-ops the
    /// remaining chain.
    async fn advance_series(&self, request: &RunRequest) -> Result<()> {
        for (index, link) in request.series_remainder.iter().enumerate() {
            let qualified = self.config.qualified_name(&link.name);
            let state = self.jobs.get(&qualified).await?;

            if let Some(state) = &state {
                if state.is_done {
                    debug!(job = %qualified, "Series job already done, skipping");
                    continue;
                }
                let liveness = self.worker_liveness(state).await;
                if liveness.is_live() {
                    debug!(job = %qualified, "Series job already in progress, chain no-ops");
                    return Ok(());
                }
            }

            let next = RunRequest::new(&link.transform_ref)
                .with_name(&link.name)
                .with_series(request.series_remainder[index + 1..].to_vec());
            let next = RunRequest {
                batch_size: request.batch_size,
                ..next
            };
            info!(job = %qualified, "Advancing series to next job");
            self.schedule_run(next).await?;
            return Ok(());
        }
        Ok(())
    }

    /// Enqueue a page run and record the resulting handle as the job's
    /// active worker (unless the run got there first).
    async fn schedule_run(&self, request: RunRequest) -> Result<WorkerRef> {
        let qualified = self.config.qualified_name(&request.name);
        let initial_cursor = match &request.cursor {
            CursorArg::At(token) => Some(token.clone()),
            _ => None,
        };
        let worker = self
            .scheduler
            .schedule(WorkItem::RunPage(request))
            .await?;
        let state = self
            .jobs
            .get_or_create(JobState::new(qualified.clone(), initial_cursor))
            .await?;
        self.persist_with(&qualified, state, move |s| {
            if !s.is_done && s.active_worker.is_none() {
                s.active_worker = Some(worker.id);
            }
        })
        .await?;
        Ok(worker)
    }
}

#[async_trait]
impl WorkDispatcher for Migrator {
    async fn dispatch(&self, worker: WorkerRef, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::RunPage(request) => {
                self.run_page(request.from_worker(worker.id)).await?;
                Ok(())
            }
            WorkItem::CancelSweep { since, after } => {
                self.cancel_sweep(since, after).await?;
                Ok(())
            }
        }
    }
}
