//! Job persistence with monotonic status transitions.

use outreach_core::job::{Job, JobStatus, JobTransitionError};
use outreach_core::segment::{SegmentId, SegmentVersion};
use outreach_core::store::{JobStore, StoreError, StoreFuture};
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
        let status_str: String = row.get("status");
        let status = JobStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Serialization(format!("invalid job status: {status_str}")))?;
        Ok(Job {
            id: row.get("id"),
            job_type: row.get("job_type"),
            status,
            segment_id: row.get::<Option<String>, _>("segment_id").map(SegmentId::new),
            segment_version: row
                .get::<Option<i64>, _>("segment_version")
                .map(SegmentVersion::new),
            payload: row.get("payload"),
            result: row.get("result"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl JobStore for PgJobStore {
    fn create(&self, job: Job) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO jobs
                    (id, job_type, status, segment_id, segment_version, payload, result,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(&job.id)
            .bind(&job.job_type)
            .bind(job.status.as_str())
            .bind(job.segment_id.as_ref().map(SegmentId::as_str))
            .bind(job.segment_version.map(SegmentVersion::value))
            .bind(&job.payload)
            .bind(&job.result)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            Ok(())
        })
    }

    fn transition(
        &self,
        job_id: String,
        status: JobStatus,
        result: Option<serde_json::Value>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            // Lock the row so concurrent transitions serialize; the
            // monotonicity check then sees the latest status.
            let row = sqlx::query("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(&job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

            let current_str: String = row.get("status");
            let current = JobStatus::parse(&current_str).ok_or_else(|| {
                StoreError::Serialization(format!("invalid job status: {current_str}"))
            })?;
            if !current.can_transition_to(status) {
                return Err(StoreError::JobTransition(JobTransitionError {
                    from: current,
                    to: status,
                }));
            }

            sqlx::query(
                r"
                UPDATE jobs
                SET status = $1,
                    result = COALESCE($2, result),
                    updated_at = now()
                WHERE id = $3
                ",
            )
            .bind(status.as_str())
            .bind(&result)
            .bind(&job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

            tracing::info!(job = %job_id, status = status.as_str(), "job transitioned");
            Ok(())
        })
    }

    fn get(&self, job_id: String) -> StoreFuture<'_, Job> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, job_type, status, segment_id, segment_version, payload, result,
                       created_at, updated_at
                FROM jobs
                WHERE id = $1
                ",
            )
            .bind(&job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

            Self::row_to_job(&row)
        })
    }
}
