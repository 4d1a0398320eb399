//! Import job endpoints.

use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::IntoParams;
use uuid::Uuid;

use conduit_core::Resource;
use conduit_queue::{JobType, NewJob};
use conduit_storage::keys::import_key;
use conduit_storage::StorageError;

use super::jobs::{job_status, load_job, JobResponse};
use super::{
    api_error, bad_request, conflict, idempotency_key, internal, not_found, parse_resource,
    queue_error, ApiError, ApiResult, ErrorResponse,
};
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImportParams {
    /// Alternative to the `resource` form field.
    pub resource: Option<String>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    api_error(err.status(), err.body_text())
}

/// Stream one multipart file field into blob storage. Returns its key.
async fn store_upload(state: &AppState, resource: Resource, mut field: Field<'_>) -> ApiResult<String> {
    let filename = field.file_name().unwrap_or("upload").to_string();
    let key = import_key(resource, Utc::now().timestamp(), &filename);
    let mut writer = state.blobs.writer(&key).await.map_err(internal)?;

    let failure = loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = writer.write(&chunk).await {
                    break internal(e);
                }
            }
            Ok(None) => {
                let bytes = writer.finish().await.map_err(internal)?;
                info!(key = %key, bytes, "import upload stored");
                return Ok(key);
            }
            Err(e) => break multipart_error(e),
        }
    };

    if let Err(e) = writer.abort().await {
        warn!(key = %key, error = %e, "failed to abort import upload");
    }
    Err(failure)
}

#[utoipa::path(
    post,
    path = "/v1/imports",
    tag = "Imports",
    params(
        ImportParams,
        ("Idempotency-Key" = Option<String>, Header, description = "Reusing a key returns 409 with the original job id")
    ),
    request_body(
        content = String,
        content_type = "multipart/form-data",
        description = "Form fields `resource` (users, articles, comments) and `file`; `resource` must come first"
    ),
    responses(
        (status = 202, description = "Import job queued", body = JobResponse),
        (status = 400, description = "Unknown resource or missing file", body = ErrorResponse),
        (status = 409, description = "Idempotency key already used", body = ErrorResponse)
    )
)]
pub async fn create_import(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ImportParams>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let idempotency_key = idempotency_key(&headers);
    if let Some(key) = &idempotency_key {
        if let Some(job_id) = state.jobs.find_by_idempotency_key(key).await.map_err(queue_error)? {
            return Err(conflict(job_id));
        }
    }

    let mut resource = params.resource.as_deref().map(parse_resource).transpose()?;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("resource") => {
                let text = field.text().await.map_err(multipart_error)?;
                resource = Some(parse_resource(&text)?);
            }
            Some("file") => {
                let Some(resource) = resource else {
                    return Err(bad_request("the resource field must precede the file"));
                };
                upload = Some((resource, store_upload(&state, resource, field).await?));
            }
            _ => {}
        }
    }

    let Some((resource, source_key)) = upload else {
        return Err(bad_request("missing file field"));
    };

    let job = state
        .jobs
        .create(NewJob::import(resource, source_key).with_idempotency_key(idempotency_key))
        .await
        .map_err(queue_error)?;
    info!(job_id = %job.id, resource = %resource, "import job queued");

    Ok((StatusCode::ACCEPTED, Json(JobResponse::new(&job, None))))
}

#[utoipa::path(
    get,
    path = "/v1/imports/{id}",
    tag = "Imports",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Import job status", body = JobResponse),
        (status = 404, description = "No such import job", body = ErrorResponse)
    )
)]
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = load_job(&state, id, JobType::Import).await?;
    Ok(Json(job_status(&state, &job).await))
}

#[utoipa::path(
    get,
    path = "/v1/imports/{id}/errors",
    tag = "Imports",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 302, description = "Redirect to the presigned error report"),
        (status = 200, description = "Error report, when the blob store cannot presign", content_type = "application/x-ndjson"),
        (status = 404, description = "No error report for this job", body = ErrorResponse)
    )
)]
pub async fn import_errors(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let job = load_job(&state, id, JobType::Import).await?;
    let Some(key) = job.result_key else {
        return Err(not_found("no error report for this job"));
    };

    match state
        .blobs
        .presigned_url(&key, state.jobs_config.error_url_ttl())
        .await
    {
        Ok(url) => Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response()),
        Err(StorageError::NotConfigured(_)) => {
            let report = state.blobs.get_bytes(&key).await.map_err(internal)?;
            Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], report).into_response())
        }
        Err(e) => Err(internal(e)),
    }
}
