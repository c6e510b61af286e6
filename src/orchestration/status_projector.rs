//! # Status Projector
//!
//! Combines persisted job state with the liveness of the active worker task
//! into the externally observable state. Pure function; persistence and the
//! scheduler are queried by the caller.
//!
//! Precedence: done wins, then persisted error or a failed worker, then a
//! canceled worker, else in progress. Unknown is reserved for names with no
//! persisted record at all (never run): an existing not-done row without a
//! live worker is an interrupted traversal, resumable from its cursor, and
//! still reads as in progress.

use crate::models::{JobState, MigrationState, WorkerLiveness};

/// Project the observable state for a job.
pub fn project_status(state: Option<&JobState>, liveness: WorkerLiveness) -> MigrationState {
    let Some(state) = state else {
        return MigrationState::Unknown;
    };

    if state.is_done {
        return MigrationState::Success;
    }
    if state.error.is_some() || liveness == WorkerLiveness::Failed {
        return MigrationState::Failed;
    }
    if liveness == WorkerLiveness::Canceled {
        return MigrationState::Canceled;
    }
    MigrationState::InProgress
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> JobState {
        JobState::new("j", None)
    }

    #[test]
    fn test_no_record_is_unknown() {
        assert_eq!(
            project_status(None, WorkerLiveness::Absent),
            MigrationState::Unknown
        );
    }

    #[test]
    fn test_done_wins_over_everything() {
        let mut s = state();
        s.is_done = true;
        s.error = Some("stale error".to_string());
        assert_eq!(
            project_status(Some(&s), WorkerLiveness::Failed),
            MigrationState::Success
        );
    }

    #[test]
    fn test_persisted_error_beats_live_worker() {
        let mut s = state();
        s.error = Some("boom".to_string());
        assert_eq!(
            project_status(Some(&s), WorkerLiveness::Running),
            MigrationState::Failed
        );
    }

    #[test]
    fn test_failed_worker_is_failed_not_canceled() {
        // A timeout at the scheduler boundary surfaces as a failed worker.
        assert_eq!(
            project_status(Some(&state()), WorkerLiveness::Failed),
            MigrationState::Failed
        );
    }

    #[test]
    fn test_canceled_worker() {
        assert_eq!(
            project_status(Some(&state()), WorkerLiveness::Canceled),
            MigrationState::Canceled
        );
    }

    #[test]
    fn test_live_worker_is_in_progress() {
        assert_eq!(
            project_status(Some(&state()), WorkerLiveness::Pending),
            MigrationState::InProgress
        );
        assert_eq!(
            project_status(Some(&state()), WorkerLiveness::Running),
            MigrationState::InProgress
        );
    }

    #[test]
    fn test_interrupted_record_is_resumable_not_unknown() {
        // A row exists but no worker does (crash, restart, or between
        // pages): the job is resumable, which is not the same as a name
        // that never ran.
        let mut s = state();
        s.cursor = Some("c4".to_string());
        s.processed = 4;
        assert_eq!(
            project_status(Some(&s), WorkerLiveness::Absent),
            MigrationState::InProgress
        );
        assert_eq!(
            project_status(Some(&state()), WorkerLiveness::Finished),
            MigrationState::InProgress
        );
    }
}
