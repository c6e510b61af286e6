//! # Job State Model
//!
//! One persisted row per job name, owning the continuation token, counters,
//! timestamps, last error, and the active-worker reference.
//!
//! ## Invariants
//!
//! - At most one live worker per job name at any time; `active_worker` is the
//!   scheduler handle for it and is unset when no task is outstanding.
//! - `is_done == true` implies `active_worker` is unset and `latest_end` is set.
//! - `processed` only increases when a page commits; an errored page or a dry
//!   run never increments it.
//!
//! ## Database Schema
//!
//! Maps to the `migrator_jobs` table:
//! - `name`: unique key (TEXT)
//! - `cursor`: opaque continuation token, NULL at start-of-collection (TEXT)
//! - `is_done`: completion flag, indexed for cancel/clear scans (BOOLEAN)
//! - `processed`: records visited this cursor lineage (BIGINT)
//! - `version`: optimistic-concurrency guard for compare-and-update (BIGINT)

use crate::orchestration::types::PageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted per-job migration progress. Mutated only by the orchestrator,
/// never by transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobState {
    pub name: String,
    pub cursor: Option<String>,
    pub is_done: bool,
    pub processed: i64,
    pub latest_start: DateTime<Utc>,
    pub latest_end: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub active_worker: Option<Uuid>,
    /// Bumped by every committed update; compare-and-update rejects writes
    /// whose version no longer matches the stored row.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl JobState {
    /// Fresh state for a job's first invocation.
    pub fn new<S: Into<String>>(name: S, cursor: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            cursor,
            is_done: false,
            processed: 0,
            latest_start: now,
            latest_end: None,
            error: None,
            active_worker: None,
            version: 0,
            created_at: now,
        }
    }

    /// Begin a new cursor lineage: explicit reset or resume-at-new-cursor.
    /// Clears completion, counters, and the last error.
    pub fn reset_lineage(&mut self, cursor: Option<String>) {
        self.cursor = cursor;
        self.is_done = false;
        self.processed = 0;
        self.latest_start = Utc::now();
        self.latest_end = None;
        self.error = None;
    }

    /// Merge one committed page into the state: advance the cursor,
    /// accumulate the processed count, and mark completion when the
    /// collection is exhausted.
    pub fn merge_page(&mut self, page: &PageResult) {
        self.cursor = page.continuation.clone();
        self.processed += page.records_processed;
        self.error = None;
        if page.is_done {
            self.is_done = true;
            self.latest_end = Some(Utc::now());
            self.active_worker = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(continuation: Option<&str>, is_done: bool, n: i64) -> PageResult {
        PageResult {
            continuation: continuation.map(str::to_string),
            is_done,
            records_processed: n,
        }
    }

    #[test]
    fn test_merge_page_advances_cursor_and_count() {
        let mut state = JobState::new("j", None);
        state.error = Some("old failure".to_string());

        state.merge_page(&page(Some("c1"), false, 2));

        assert_eq!(state.cursor.as_deref(), Some("c1"));
        assert_eq!(state.processed, 2);
        assert!(state.error.is_none());
        assert!(!state.is_done);
        assert!(state.latest_end.is_none());
    }

    #[test]
    fn test_merge_final_page_satisfies_done_invariant() {
        let mut state = JobState::new("j", None);
        state.active_worker = Some(Uuid::new_v4());

        state.merge_page(&page(None, true, 3));

        assert!(state.is_done);
        assert!(state.latest_end.is_some());
        assert!(state.active_worker.is_none());
    }

    #[test]
    fn test_reset_lineage_clears_progress() {
        let mut state = JobState::new("j", None);
        state.merge_page(&page(None, true, 10));

        state.reset_lineage(Some("middle".to_string()));

        assert_eq!(state.cursor.as_deref(), Some("middle"));
        assert!(!state.is_done);
        assert_eq!(state.processed, 0);
        assert!(state.latest_end.is_none());
    }
}
