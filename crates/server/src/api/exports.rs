//! Export job endpoints and the synchronous streaming export.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use conduit_ingest::{ExportFilters, ExportFormat};
use conduit_queue::{ExportConfig, JobType, NewJob};

use super::jobs::{job_status, load_job, JobResponse};
use super::{
    bad_request, conflict, idempotency_key, parse_resource, queue_error, ApiResult, ErrorResponse,
};
use crate::state::AppState;

/// Chunks buffered between the export producer and the response body.
const STREAM_CAPACITY: usize = 16;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateExportRequest {
    #[schema(example = "articles")]
    pub resource: String,
    /// `ndjson` (default), `csv` or `json`.
    #[schema(example = "csv")]
    pub format: Option<String>,
    /// `username` for users, `author` and `slug` for articles, `article` for comments.
    #[serde(default)]
    #[schema(value_type = HashMap<String, String>)]
    pub filters: ExportFilters,
}

fn parse_format(raw: Option<&str>) -> ApiResult<ExportFormat> {
    raw.unwrap_or_default().parse().map_err(bad_request)
}

#[utoipa::path(
    post,
    path = "/v1/exports",
    tag = "Exports",
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Reusing a key returns 409 with the original job id")
    ),
    request_body = CreateExportRequest,
    responses(
        (status = 202, description = "Export job queued", body = JobResponse),
        (status = 400, description = "Unknown resource or format", body = ErrorResponse),
        (status = 409, description = "Idempotency key already used", body = ErrorResponse)
    )
)]
pub async fn create_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateExportRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let resource = parse_resource(&req.resource)?;
    let format = parse_format(req.format.as_deref())?;

    let idempotency_key = idempotency_key(&headers);
    if let Some(key) = &idempotency_key {
        if let Some(job_id) = state.jobs.find_by_idempotency_key(key).await.map_err(queue_error)? {
            return Err(conflict(job_id));
        }
    }

    let config = ExportConfig::new(format, req.filters);
    let job = state
        .jobs
        .create(NewJob::export(resource, &config).with_idempotency_key(idempotency_key))
        .await
        .map_err(queue_error)?;
    info!(job_id = %job.id, resource = %resource, format = %format, "export job queued");

    Ok((StatusCode::ACCEPTED, Json(JobResponse::new(&job, None))))
}

#[utoipa::path(
    get,
    path = "/v1/exports/{id}",
    tag = "Exports",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Export job status", body = JobResponse),
        (status = 404, description = "No such export job", body = ErrorResponse)
    )
)]
pub async fn get_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = load_job(&state, id, JobType::Export).await?;
    Ok(Json(job_status(&state, &job).await))
}

#[utoipa::path(
    get,
    path = "/v1/exports",
    tag = "Exports",
    params(
        ("resource" = String, Query, description = "users, articles or comments"),
        ("format" = Option<String>, Query, description = "ndjson (default), csv or json. Every other query parameter is an export filter")
    ),
    responses(
        (status = 200, description = "Export body, streamed as it is produced"),
        (status = 400, description = "Unknown resource or format", body = ErrorResponse)
    )
)]
pub async fn stream_export(
    State(state): State<Arc<AppState>>,
    Query(mut params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let Some(raw) = params.remove("resource") else {
        return Err(bad_request("missing resource query parameter"));
    };
    let resource = parse_resource(&raw)?;
    let format = parse_format(params.remove("format").as_deref())?;
    let filters: ExportFilters = params.into_iter().collect();

    info!(resource = %resource, format = %format, "streaming export");
    let stream = state.exporter.spawn(resource, format, filters, STREAM_CAPACITY);
    let disposition = format!("attachment; filename=\"{resource}.{}\"", format.extension());

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReceiverStream::new(stream.chunks)),
    )
        .into_response())
}
