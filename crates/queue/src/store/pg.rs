//! `jobs` table in PostgreSQL.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED`, so any number of workers can poll
//! the same table without handing one job to two of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::{to_db, JobStore};
use crate::error::QueueError;
use crate::job::{Job, JobCompletion, NewJob};

const JOB_COLUMNS: &str = "id, type, resource, status, source_key, result_key, total_rows, \
     processed_rows, failed_rows, idempotency_key, error_message, created_at, updated_at";

/// Raw row; enum columns are TEXT.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    job_type: String,
    resource: String,
    status: String,
    source_key: String,
    result_key: Option<String>,
    total_rows: i64,
    processed_rows: i64,
    failed_rows: i64,
    idempotency_key: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| QueueError::Corrupt { id, reason };
        Ok(Job {
            id: row.id,
            job_type: row.job_type.parse().map_err(corrupt)?,
            resource: row.resource.parse().map_err(|e| corrupt(format!("{e}")))?,
            status: row.status.parse().map_err(corrupt)?,
            source_key: row.source_key,
            result_key: row.result_key,
            total_rows: row.total_rows,
            processed_rows: row.processed_rows,
            failed_rows: row.failed_rows,
            idempotency_key: row.idempotency_key,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain a guarded terminal UPDATE that matched no row.
    async fn transition_error(&self, id: Uuid) -> QueueError {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        match status {
            Ok(Some(status)) => match status.parse() {
                Ok(status) => QueueError::NotProcessing { id, status },
                Err(reason) => QueueError::Corrupt { id, reason },
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => QueueError::Database(e),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, QueueError> {
        let sql = format!(
            "INSERT INTO jobs (id, type, resource, status, source_key, idempotency_key, created_at, updated_at)
             VALUES ($1, $2, $3, 'PENDING', $4, $5, now(), now())
             RETURNING {JOB_COLUMNS}"
        );
        let result = sqlx::query_as::<_, JobRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(job.job_type.as_str())
            .bind(job.resource.as_str())
            .bind(&job.source_key)
            .bind(job.idempotency_key.as_deref())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Job::try_from(row),
            Err(e) if is_unique_violation(&e) => {
                let key = job.idempotency_key.as_deref().unwrap_or_default();
                match self.find_by_idempotency_key(key).await? {
                    Some(job_id) => Err(QueueError::Conflict { job_id }),
                    None => Err(QueueError::Database(e)),
                }
            }
            Err(e) => {
                error!(error = %e, "job insert failed");
                Err(QueueError::Database(e))
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, QueueError> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM jobs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM jobs
             WHERE status = 'PENDING'
             ORDER BY created_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let sql = format!(
            "UPDATE jobs SET status = 'PROCESSING', updated_at = now()
             WHERE id = $1
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(job_id = %id, "job claimed");
        Job::try_from(row).map(Some)
    }

    async fn set_total(&self, id: Uuid, total: u64) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET total_rows = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(to_db(total))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, processed: u64, failed: u64) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE jobs SET processed_rows = $2, failed_rows = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(to_db(processed))
        .bind(to_db(failed))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, done: &JobCompletion) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'COMPLETED', processed_rows = $2, failed_rows = $3, total_rows = $4,
                 result_key = $5, error_message = NULL, updated_at = now()
             WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(to_db(done.processed))
        .bind(to_db(done.failed))
        .bind(to_db(done.total))
        .bind(done.result_key.as_deref())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.transition_error(id).await);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, message: &str, result_key: Option<&str>) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'FAILED', error_message = $2, result_key = $3, updated_at = now()
             WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(message)
        .bind(result_key)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.transition_error(id).await);
        }
        Ok(())
    }
}

/// PostgreSQL unique violation (23505).
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
