//! # PostgreSQL Job Store
//!
//! Production persistence for [`JobState`] rows. One `migrator_jobs` table,
//! unique on `name`, with a secondary index on `is_done` for cancel-all and
//! retention scans. Queries are runtime-checked (`sqlx::query_as::<_, T>`)
//! so the crate builds without a live database.
//!
//! Compare-and-update is a single `UPDATE ... WHERE name = $1 AND version = $2`
//! statement; PostgreSQL's row-level serialization of concurrent writers to
//! the same key is what makes the one-live-worker invariant enforceable
//! without an external lock manager.

use crate::error::Result;
use crate::models::JobState;
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS migrator_jobs (
    name          TEXT PRIMARY KEY,
    cursor        TEXT,
    is_done       BOOLEAN NOT NULL DEFAULT FALSE,
    processed     BIGINT NOT NULL DEFAULT 0,
    latest_start  TIMESTAMPTZ NOT NULL,
    latest_end    TIMESTAMPTZ,
    error         TEXT,
    active_worker UUID,
    version       BIGINT NOT NULL DEFAULT 0,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_migrator_jobs_is_done ON migrator_jobs (is_done);
";

/// SQLx-backed [`JobStore`] implementation.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `migrator_jobs` table and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("migrator_jobs schema ensured");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, name: &str) -> Result<Option<JobState>> {
        let row = sqlx::query_as::<_, JobState>("SELECT * FROM migrator_jobs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_or_create(&self, state: JobState) -> Result<JobState> {
        sqlx::query(
            "INSERT INTO migrator_jobs \
             (name, cursor, is_done, processed, latest_start, latest_end, error, active_worker, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&state.name)
        .bind(&state.cursor)
        .bind(state.is_done)
        .bind(state.processed)
        .bind(state.latest_start)
        .bind(state.latest_end)
        .bind(&state.error)
        .bind(state.active_worker)
        .bind(state.version)
        .bind(state.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, JobState>("SELECT * FROM migrator_jobs WHERE name = $1")
            .bind(&state.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(&self, state: JobState) -> Result<Option<JobState>> {
        let row = sqlx::query_as::<_, JobState>(
            "UPDATE migrator_jobs SET \
             cursor = $3, is_done = $4, processed = $5, latest_start = $6, \
             latest_end = $7, error = $8, active_worker = $9, version = version + 1 \
             WHERE name = $1 AND version = $2 \
             RETURNING *",
        )
        .bind(&state.name)
        .bind(state.version)
        .bind(&state.cursor)
        .bind(state.is_done)
        .bind(state.processed)
        .bind(state.latest_start)
        .bind(state.latest_end)
        .bind(&state.error)
        .bind(state.active_worker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_not_done(
        &self,
        since: Option<DateTime<Utc>>,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<JobState>> {
        let rows = sqlx::query_as::<_, JobState>(
            "SELECT * FROM migrator_jobs \
             WHERE is_done = FALSE \
               AND ($1::timestamptz IS NULL OR created_at >= $1) \
               AND ($2::text IS NULL OR name > $2) \
             ORDER BY name ASC \
             LIMIT $3",
        )
        .bind(since)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobState>> {
        let rows = sqlx::query_as::<_, JobState>(
            "SELECT * FROM migrator_jobs ORDER BY latest_start DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_done_before(
        &self,
        cutoff: Option<DateTime<Utc>>,
        page_size: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM migrator_jobs WHERE name IN ( \
               SELECT name FROM migrator_jobs \
               WHERE is_done = TRUE \
                 AND ($1::timestamptz IS NULL OR latest_end < $1) \
               ORDER BY name ASC \
               LIMIT $2 \
             )",
        )
        .bind(cutoff)
        .bind(page_size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
