use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use conduit_ingest::ProgressSink;

use crate::store::JobStore;

/// Publishes pipeline counters onto the job record so status polls see
/// live progress. Write failures are logged, never propagated.
pub struct JobProgress {
    jobs: Arc<dyn JobStore>,
    job_id: Uuid,
}

impl JobProgress {
    pub fn new(jobs: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { jobs, job_id }
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn set_total(&self, total: u64) {
        if let Err(e) = self.jobs.set_total(self.job_id, total).await {
            warn!(job_id = %self.job_id, error = %e, "failed to record row estimate");
        }
    }

    async fn update(&self, processed: u64, failed: u64) {
        if let Err(e) = self.jobs.update_progress(self.job_id, processed, failed).await {
            warn!(job_id = %self.job_id, error = %e, "failed to record progress");
        }
    }
}
