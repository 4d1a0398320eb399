use utoipa::OpenApi;

use super::exports::CreateExportRequest;
use super::health::HealthResponse;
use super::jobs::JobResponse;
use super::ErrorResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Conduit Bulk Jobs API",
        version = "0.1.0",
        description = "Asynchronous bulk import and export of Conduit users, articles and comments"
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Imports", description = "Upload a file and track the import job"),
        (name = "Exports", description = "Queue an export job or stream one synchronously")
    ),
    paths(
        super::health::health,
        super::imports::create_import,
        super::imports::get_import,
        super::imports::import_errors,
        super::exports::create_export,
        super::exports::get_export,
        super::exports::stream_export,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        JobResponse,
        CreateExportRequest,
    ))
)]
pub struct ApiDoc;
