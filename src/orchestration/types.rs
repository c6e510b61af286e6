//! Shared orchestration types: the run request and its builder, cursor
//! semantics, page results, and series links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested cursor position for a page invocation.
///
/// The three values are deliberately distinct: `Unset` resumes from whatever
/// is persisted, `Reset` (the explicit null cursor) always means start over,
/// and `At` resumes from a specific token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorArg {
    /// Resume from the persisted cursor, or start fresh if none exists.
    #[default]
    Unset,
    /// Explicit start-over from the beginning of the collection.
    Reset,
    /// Resume at this continuation token.
    At(String),
}

impl CursorArg {
    /// The cursor value this argument asks for, where `Unset` has no opinion.
    pub fn requested(&self) -> Option<Option<String>> {
        match self {
            Self::Unset => None,
            Self::Reset => Some(None),
            Self::At(token) => Some(Some(token.clone())),
        }
    }
}

/// One link in a chain of jobs to run in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLink {
    /// Job name (before namespace qualification).
    pub name: String,
    /// Registry reference of the transform to run.
    pub transform_ref: String,
}

impl SeriesLink {
    pub fn new<S: Into<String>>(transform_ref: S) -> Self {
        let transform_ref = transform_ref.into();
        Self {
            name: transform_ref.clone(),
            transform_ref,
        }
    }

    pub fn named<N: Into<String>, R: Into<String>>(name: N, transform_ref: R) -> Self {
        Self {
            name: name.into(),
            transform_ref: transform_ref.into(),
        }
    }
}

/// Input to one orchestrator page invocation: the unit that gets scheduled
/// and re-scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Job name (before namespace qualification). Defaults to the transform
    /// reference.
    pub name: String,
    /// Registry reference resolving to the transform to run.
    pub transform_ref: String,
    pub cursor: CursorArg,
    /// Page size; must be positive when given.
    pub batch_size: Option<i64>,
    /// Execute one page and roll everything back, returning the would-be
    /// status. Never persists anything.
    pub dry_run: bool,
    /// Jobs to chain after this one completes.
    pub series_remainder: Vec<SeriesLink>,
    /// Process one page and return without rescheduling; the caller drives
    /// subsequent pages.
    pub single_page_only: bool,
    /// Set when this request is a scheduled continuation: the worker handle
    /// the enqueueing invocation recorded as the job's active worker.
    pub worker: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new<S: Into<String>>(transform_ref: S) -> Self {
        let transform_ref = transform_ref.into();
        Self {
            name: transform_ref.clone(),
            transform_ref,
            cursor: CursorArg::Unset,
            batch_size: None,
            dry_run: false,
            series_remainder: Vec::new(),
            single_page_only: false,
            worker: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cursor(mut self, cursor: CursorArg) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_series(mut self, series_remainder: Vec<SeriesLink>) -> Self {
        self.series_remainder = series_remainder;
        self
    }

    pub fn single_page(mut self, single_page_only: bool) -> Self {
        self.single_page_only = single_page_only;
        self
    }

    pub(crate) fn from_worker(mut self, worker: Uuid) -> Self {
        self.worker = Some(worker);
        self
    }
}

/// The unit returned by the page processor to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// Token to resume after this page; `None` once traversal is complete.
    pub continuation: Option<String>,
    /// True when this page reached the end of the collection.
    pub is_done: bool,
    /// Records visited on this page, changed or not.
    pub records_processed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_arg_requested() {
        assert_eq!(CursorArg::Unset.requested(), None);
        assert_eq!(CursorArg::Reset.requested(), Some(None));
        assert_eq!(
            CursorArg::At("c1".to_string()).requested(),
            Some(Some("c1".to_string()))
        );
    }

    #[test]
    fn test_run_request_builder() {
        let request = RunRequest::new("set-default")
            .with_batch_size(25)
            .dry_run(true)
            .with_series(vec![SeriesLink::new("backfill")])
            .single_page(true);

        assert_eq!(request.name, "set-default");
        assert_eq!(request.transform_ref, "set-default");
        assert_eq!(request.batch_size, Some(25));
        assert!(request.dry_run);
        assert!(request.single_page_only);
        assert_eq!(request.series_remainder.len(), 1);
        assert_eq!(request.cursor, CursorArg::Unset);
    }

    #[test]
    fn test_run_request_round_trips_through_json() {
        let request = RunRequest::new("j").with_cursor(CursorArg::At("tok".to_string()));
        let json = serde_json::to_string(&request).unwrap();
        let parsed: RunRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.cursor, CursorArg::At("tok".to_string()));
        assert_eq!(parsed.name, "j");
    }
}
