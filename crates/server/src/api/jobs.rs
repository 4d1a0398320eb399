//! Job status rendering shared by the import and export handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use conduit_core::Resource;
use conduit_queue::{Job, JobStatus, JobType};

use super::{not_found, queue_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "IMPORT")]
    pub job_type: JobType,
    #[schema(value_type = String, example = "users")]
    pub resource: Resource,
    #[schema(value_type = String, example = "PROCESSING")]
    pub status: JobStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub failed_rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Presigned link to the export output or the import error report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobResponse {
    pub fn new(job: &Job, download_url: Option<String>) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            resource: job.resource,
            status: job.status,
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            failed_rows: job.failed_rows,
            error_message: job.error_message.clone(),
            download_url,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Fetch a job, treating a job of the other type as missing.
pub(super) async fn load_job(state: &AppState, id: Uuid, job_type: JobType) -> ApiResult<Job> {
    match state.jobs.get(id).await.map_err(queue_error)? {
        Some(job) if job.job_type == job_type => Ok(job),
        _ => Err(not_found(format!("job not found: {id}"))),
    }
}

/// Status view with a download link when the job has a result artifact.
/// Backends that cannot presign simply omit the link.
pub(super) async fn job_status(state: &AppState, job: &Job) -> JobResponse {
    let ttl = match job.job_type {
        JobType::Import => state.jobs_config.error_url_ttl(),
        JobType::Export => state.jobs_config.result_url_ttl(),
    };
    let download_url = match &job.result_key {
        Some(key) => match state.blobs.presigned_url(key, ttl).await {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(job_id = %job.id, error = %e, "no download url");
                None
            }
        },
        None => None,
    };
    JobResponse::new(job, download_url)
}
