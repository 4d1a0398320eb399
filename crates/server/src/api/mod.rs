//! HTTP handlers for job creation, job status and synchronous export.

pub mod doc;
mod exports;
mod health;
mod imports;
mod jobs;

use std::fmt;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use conduit_core::Resource;
use conduit_queue::QueueError;

pub use exports::{create_export, get_export, stream_export};
pub use health::health;
pub use imports::{create_import, get_import, import_errors};

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Existing job, on an idempotency conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn api_error(status: StatusCode, message: impl fmt::Display) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            job_id: None,
        }),
    )
}

pub(crate) fn bad_request(message: impl fmt::Display) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn not_found(message: impl fmt::Display) -> ApiError {
    api_error(StatusCode::NOT_FOUND, message)
}

pub(crate) fn internal(err: impl fmt::Display) -> ApiError {
    error!(error = %err, "request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err)
}

pub(crate) fn conflict(job_id: Uuid) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: format!("idempotency key already used by job {job_id}"),
            job_id: Some(job_id),
        }),
    )
}

pub(crate) fn queue_error(err: QueueError) -> ApiError {
    match err {
        QueueError::Conflict { job_id } => conflict(job_id),
        QueueError::NotFound(id) => not_found(format!("job not found: {id}")),
        other => internal(other),
    }
}

pub(crate) fn parse_resource(raw: &str) -> ApiResult<Resource> {
    raw.parse().map_err(bad_request)
}

pub(crate) const IDEMPOTENCY_KEY: &str = "idempotency-key";

pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
