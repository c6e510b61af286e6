use crate::error::{MigratorError, Result};

/// Engine-wide configuration threaded through the [`Migrator`](crate::orchestration::Migrator)
/// constructor. Job-name namespacing is an explicit field here rather than
/// ambient global state.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Prefix applied to every job name before it touches the job store.
    /// Lets multiple engines share one store without colliding.
    pub job_name_prefix: String,
    /// Page size used when the caller does not supply one.
    pub default_batch_size: i64,
    /// Page size for cancel-all sweeps over not-done jobs.
    pub cancel_page_size: i64,
    /// Default limit for `status` queries that name no jobs.
    pub status_limit: i64,
    /// Run per-record transforms concurrently within a page by default.
    /// Callers must guarantee idempotence before enabling this.
    pub parallel_pages: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            job_name_prefix: String::new(),
            default_batch_size: 100,
            cancel_page_size: 32,
            status_limit: 50,
            parallel_pages: false,
        }
    }
}

impl MigratorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("MIGRATOR_JOB_PREFIX") {
            config.job_name_prefix = prefix;
        }

        if let Ok(batch_size) = std::env::var("MIGRATOR_DEFAULT_BATCH_SIZE") {
            config.default_batch_size = batch_size.parse().map_err(|e| {
                MigratorError::Configuration(format!("Invalid default_batch_size: {e}"))
            })?;
        }

        if let Ok(page_size) = std::env::var("MIGRATOR_CANCEL_PAGE_SIZE") {
            config.cancel_page_size = page_size.parse().map_err(|e| {
                MigratorError::Configuration(format!("Invalid cancel_page_size: {e}"))
            })?;
        }

        if config.default_batch_size <= 0 {
            return Err(MigratorError::Configuration(
                "default_batch_size must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    /// Apply the configured namespace prefix to a job name.
    pub fn qualified_name(&self, name: &str) -> String {
        format!("{}{}", self.job_name_prefix, name)
    }
}
