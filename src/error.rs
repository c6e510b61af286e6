//! Error types for the migration engine.
//!
//! The taxonomy follows the failure surfaces of a page invocation:
//! configuration problems fail before any state mutation, transform failures
//! abort the whole page and carry the offending record's identifier, and a
//! stale continuation token is fatal and carries restart guidance.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MigratorError {
    /// Invalid caller-supplied configuration (bad batch size, missing
    /// required argument). Never retried, never creates job state.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested transform reference does not resolve to a registered
    /// transform. Fails before job state is created.
    #[error("Transform not found in registry: {transform_ref}")]
    TransformNotFound { transform_ref: String },

    /// User transform code failed while processing a record. The whole page
    /// aborts; nothing from the page is committed.
    #[error("Transform failed for job {job} on record {record_id}: {reason}")]
    Transform {
        job: String,
        record_id: String,
        reason: String,
    },

    /// The continuation token no longer matches the collection's current
    /// query shape. Fatal and non-retriable with the same token.
    #[error(
        "Invalid continuation token for job {job}: {reason}. \
         Restart the job with a null cursor to traverse the collection from the beginning"
    )]
    InvalidCursor { job: String, reason: String },

    /// Job-state or collection persistence failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The external work scheduler rejected or lost a unit of work.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MigratorError {
    /// Fatal errors must not be retried with the same inputs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCursor { .. } | Self::Configuration(_) | Self::TransformNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for MigratorError {
    fn from(error: serde_json::Error) -> Self {
        MigratorError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for MigratorError {
    fn from(error: sqlx::Error) -> Self {
        MigratorError::Store(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MigratorError>;
