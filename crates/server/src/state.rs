use std::sync::Arc;

use conduit_core::config::JobsConfig;
use conduit_ingest::Exporter;
use conduit_queue::JobStore;
use conduit_storage::BlobStore;

pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub blobs: Arc<BlobStore>,
    /// Serves the synchronous export endpoint.
    pub exporter: Arc<Exporter>,
    pub jobs_config: JobsConfig,
    pub max_upload_bytes: usize,
}
