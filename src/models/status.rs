//! Externally observable job status: the state enum, worker liveness as
//! reported by the scheduler, and the combined `JobStatus` projection.

use crate::models::job_state::JobState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable state of a migration job, projected from persisted state plus
/// the liveness of any active worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// A worker task is pending or running for this job
    InProgress,
    /// The full collection has been traversed since the last restart
    Success,
    /// The last page errored, or the worker task failed
    Failed,
    /// The active worker task was revoked
    Canceled,
    /// No job record and no task, e.g. a name never run
    Unknown,
}

impl MigrationState {
    /// Terminal states require an explicit re-invocation to make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for MigrationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid migration state: {s}")),
        }
    }
}

/// Liveness of a scheduled worker task, as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLiveness {
    Pending,
    Running,
    Finished,
    Failed,
    Canceled,
    /// The scheduler has no record of the handle (never scheduled here, or
    /// the hosting process restarted).
    Absent,
}

impl WorkerLiveness {
    /// Live workers block a second invocation of the same job name.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// The unit returned by every status-bearing operation: persisted progress
/// combined into one externally observable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub cursor: Option<String>,
    pub processed: i64,
    pub is_done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: MigrationState,
    pub latest_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_end: Option<DateTime<Utc>>,
    /// Batch size of the run that produced this status (dry runs echo it back)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    /// Names of series jobs still pending after this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Vec<String>>,
}

impl JobStatus {
    /// Build a status snapshot from persisted state plus a projected state.
    pub fn from_state(state: &JobState, projected: MigrationState) -> Self {
        Self {
            name: state.name.clone(),
            cursor: state.cursor.clone(),
            processed: state.processed,
            is_done: state.is_done,
            error: state.error.clone(),
            state: projected,
            latest_start: state.latest_start,
            latest_end: state.latest_end,
            batch_size: None,
            next: None,
        }
    }

    /// Synthetic entry for a name that has never run.
    pub fn unknown<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            cursor: None,
            processed: 0,
            is_done: false,
            error: None,
            state: MigrationState::Unknown,
            latest_start: Utc::now(),
            latest_end: None,
            batch_size: None,
            next: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_next(mut self, next: Vec<String>) -> Self {
        if !next.is_empty() {
            self.next = Some(next);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(MigrationState::InProgress.to_string(), "in_progress");
        assert_eq!(
            "canceled".parse::<MigrationState>().unwrap(),
            MigrationState::Canceled
        );
        assert!("bogus".parse::<MigrationState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&MigrationState::Success).unwrap();
        assert_eq!(json, "\"success\"");
        let parsed: MigrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, MigrationState::Success);
    }

    #[test]
    fn test_terminal_states() {
        assert!(MigrationState::Success.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(MigrationState::Canceled.is_terminal());
        assert!(!MigrationState::InProgress.is_terminal());
        assert!(!MigrationState::Unknown.is_terminal());
    }

    #[test]
    fn test_liveness_is_live() {
        assert!(WorkerLiveness::Pending.is_live());
        assert!(WorkerLiveness::Running.is_live());
        assert!(!WorkerLiveness::Finished.is_live());
        assert!(!WorkerLiveness::Canceled.is_live());
        assert!(!WorkerLiveness::Absent.is_live());
    }

    #[test]
    fn test_status_from_state() {
        let state = JobState::new("j", Some("c".to_string()));
        let status = JobStatus::from_state(&state, MigrationState::InProgress)
            .with_batch_size(10)
            .with_next(vec!["b".to_string()]);
        assert_eq!(status.name, "j");
        assert_eq!(status.cursor.as_deref(), Some("c"));
        assert_eq!(status.batch_size, Some(10));
        assert_eq!(status.next, Some(vec!["b".to_string()]));
    }
}
