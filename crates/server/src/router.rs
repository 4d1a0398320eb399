//! HTTP router construction.
//!
//! Assembles the job routes, middleware and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(api::health))
        .route(
            "/v1/imports",
            post(api::create_import).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/v1/imports/{id}", get(api::get_import))
        .route("/v1/imports/{id}/errors", get(api::import_errors))
        .route(
            "/v1/exports",
            get(api::stream_export).post(api::create_export),
        )
        .route("/v1/exports/{id}", get(api::get_export))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use conduit_core::config::JobsConfig;
    use conduit_core::Resource;
    use conduit_ingest::{Exporter, MemoryStore};
    use conduit_queue::{JobCompletion, JobStore, MemoryJobStore, NewJob};
    use conduit_storage::BlobStore;

    use super::*;

    struct TestApp {
        router: Router,
        jobs: Arc<MemoryJobStore>,
        blobs: Arc<BlobStore>,
    }

    fn app() -> TestApp {
        let data = Arc::new(MemoryStore::new());
        data.add_user("u1", "alice@example.com", "alice");
        data.add_user("u2", "bob@example.com", "bob");

        let jobs = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(BlobStore::in_memory());
        let state = Arc::new(AppState {
            jobs: jobs.clone(),
            blobs: blobs.clone(),
            exporter: Arc::new(Exporter::new(data)),
            jobs_config: JobsConfig::default(),
            max_upload_bytes: 1024 * 1024,
        });
        TestApp {
            router: build_router(state),
            jobs,
            blobs,
        }
    }

    async fn body_bytes(response: axum::response::Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn multipart_request(resource: &str, file: &str, idempotency_key: Option<&str>) -> Request<Body> {
        let boundary = "conduit-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"resource\"\r\n\r\n\
             {resource}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"users.ndjson\"\r\n\
             Content-Type: application/x-ndjson\r\n\r\n\
             {file}\r\n\
             --{boundary}--\r\n"
        );
        let mut builder = Request::post("/v1/imports").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        );
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app();
        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn export_job_is_queued_and_readable() {
        let app = app();
        let request = Request::post("/v1/exports")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"resource": "users", "format": "csv", "filters": {"username": "alice"}})
                    .to_string(),
            ))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let created = body_json(response).await;
        assert_eq!(created["type"], "EXPORT");
        assert_eq!(created["status"], "PENDING");
        assert_eq!(created["resource"], "users");

        let id = created["id"].as_str().unwrap();
        let response = app
            .router
            .oneshot(
                Request::get(format!("/v1/exports/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], id);

        let stored = app.jobs.all();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].source_key.contains("\"csv\""));
    }

    #[tokio::test]
    async fn unknown_export_format_is_rejected() {
        let app = app();
        let request = Request::post("/v1/exports")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"resource": "users", "format": "xml"}).to_string()))
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.jobs.all().is_empty());
    }

    #[tokio::test]
    async fn streams_csv_export_with_filters() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::get("/v1/exports?resource=users&format=csv&username=bob")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"users.csv\""
        );

        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "id,username,email,bio,image");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("u2,bob,bob@example.com"));
    }

    #[tokio::test]
    async fn stream_export_requires_resource() {
        let app = app();
        let response = app
            .router
            .oneshot(Request::get("/v1/exports?format=csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::get(format!("/v1/imports/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn export_job_is_not_an_import() {
        let app = app();
        let job = app
            .jobs
            .create(NewJob::export(Resource::Users, &Default::default()))
            .await
            .unwrap();
        let response = app
            .router
            .oneshot(
                Request::get(format!("/v1/imports/{}", job.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn multipart_import_honours_idempotency_key() {
        let app = app();
        let file = r#"{"id":"u9","email":"carol@example.com","username":"carol"}"#;

        let response = app
            .router
            .clone()
            .oneshot(multipart_request("users", file, Some("batch-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let created = body_json(response).await;
        assert_eq!(created["type"], "IMPORT");

        let stored = app.jobs.all();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].source_key.starts_with("imports/users/"));
        assert!(stored[0].source_key.ends_with("_users.ndjson"));
        let uploaded = app.blobs.get_bytes(&stored[0].source_key).await.unwrap();
        assert_eq!(uploaded, file.as_bytes());

        let response = app
            .router
            .oneshot(multipart_request("users", file, Some("batch-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["job_id"], created["id"]);
        assert_eq!(app.jobs.all().len(), 1);
    }

    #[tokio::test]
    async fn multipart_import_rejects_unknown_resource() {
        let app = app();
        let response = app
            .router
            .oneshot(multipart_request("tags", "{}", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.jobs.all().is_empty());
    }

    #[tokio::test]
    async fn error_report_is_served_without_presigning() {
        let app = app();
        let job = app
            .jobs
            .create(NewJob::import(Resource::Users, "imports/users/1_users.ndjson"))
            .await
            .unwrap();

        let errors_uri = format!("/v1/imports/{}/errors", job.id);
        let response = app
            .router
            .clone()
            .oneshot(Request::get(&errors_uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let report = "{\"type\":\"VALIDATION_ERROR\",\"id\":\"u1\",\"message\":\"bad\"}\n";
        let key = format!("errors/{}.ndjson", job.id);
        app.blobs.put_bytes(&key, Bytes::from(report)).await.unwrap();
        app.jobs.claim_next().await.unwrap();
        app.jobs
            .complete(
                job.id,
                &JobCompletion {
                    processed: 0,
                    failed: 1,
                    total: 1,
                    result_key: Some(key),
                },
            )
            .await
            .unwrap();

        let response = app
            .router
            .clone()
            .oneshot(Request::get(&errors_uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-ndjson");
        assert_eq!(body_bytes(response).await, report.as_bytes());

        // the in-memory backend cannot presign, so status carries no link
        let response = app
            .router
            .oneshot(
                Request::get(format!("/v1/imports/{}", job.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["status"], "COMPLETED");
        assert_eq!(status["failed_rows"], 1);
        assert!(status.get("download_url").is_none());
    }
}
