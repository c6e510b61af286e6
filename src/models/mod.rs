//! Data layer: the persisted job-state row and its externally observable
//! projections.

pub mod job_state;
pub mod status;

pub use job_state::JobState;
pub use status::{JobStatus, MigrationState, WorkerLiveness};
