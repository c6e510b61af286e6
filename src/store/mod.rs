//! # Store Layer
//!
//! Two persistence seams, both async traits so the engine stays agnostic of
//! the host store:
//!
//! - [`JobStore`] owns the per-job [`JobState`] rows. Updates are
//!   version-guarded compare-and-update operations; a lost update means
//!   another invocation won the race and the caller must re-read rather than
//!   overwrite.
//! - [`CollectionStore`] is the interface to the external transactional
//!   document store that owns the paging primitive. All record reads and
//!   writes for one page happen inside a single [`CollectionTx`], which the
//!   dry-run path rolls back unconditionally.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCollection, MemoryJobStore};
pub use postgres::PgJobStore;

use crate::error::Result;
use crate::models::JobState;
use crate::transform::{PartialUpdate, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One bounded batch of records fetched from the collection.
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<Record>,
    /// Token to resume after this page; `None` once the traversal is done.
    pub continuation: Option<String>,
    /// True when this page reaches the end of the collection.
    pub is_done: bool,
}

/// Persistence for [`JobState`] rows, keyed by unique job name.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<JobState>>;

    /// Insert the given state if no row exists for its name; return the
    /// persisted row either way.
    async fn get_or_create(&self, state: JobState) -> Result<JobState>;

    /// Compare-and-update: applies the write only if the stored version still
    /// matches `state.version`, bumping the version. Returns the stored row
    /// on success, `None` when another writer got there first.
    async fn update(&self, state: JobState) -> Result<Option<JobState>>;

    /// Not-done jobs ordered by name, for cancel-all sweeps. `after` pages
    /// past already-swept names; `since` filters by creation time.
    async fn list_not_done(
        &self,
        since: Option<DateTime<Utc>>,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<JobState>>;

    /// Most recently started jobs first, for the status query.
    async fn list_recent(&self, limit: i64) -> Result<Vec<JobState>>;

    /// Delete one page of terminal (done) rows older than the cutoff.
    /// Returns the number of rows removed; callers loop until zero.
    async fn delete_done_before(
        &self,
        cutoff: Option<DateTime<Utc>>,
        page_size: i64,
    ) -> Result<u64>;
}

/// The external transactional document store holding the target collection.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CollectionTx>>;
}

/// One transaction against the target collection. Exactly one page of work
/// happens per transaction; `commit` and `rollback` consume it.
#[async_trait]
pub trait CollectionTx: Send {
    /// Fetch one page starting after the given continuation token (`None`
    /// means start-of-collection), sized by `batch_size`.
    async fn fetch_page(&mut self, cursor: Option<&str>, batch_size: i64) -> Result<RecordPage>;

    /// Merge a partial update into one record as a single store-level write.
    async fn apply_update(&mut self, record_id: &str, update: &PartialUpdate) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
