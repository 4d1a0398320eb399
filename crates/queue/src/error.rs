//! Queue error types.

use thiserror::Error;
use uuid::Uuid;

use conduit_ingest::{ExportError, IngestError};
use conduit_storage::StorageError;

use crate::job::JobStatus;

/// Job-record persistence errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// A job with the same idempotency key already exists.
    #[error("duplicate idempotency key: job {job_id} already exists")]
    Conflict { job_id: Uuid },

    /// Terminal transitions apply only to a PROCESSING job.
    #[error("job {id} is {status}, not PROCESSING")]
    NotProcessing { id: Uuid, status: JobStatus },

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Fatal job failures. The display text becomes the job's `error_message`.
#[derive(Debug, Error)]
pub enum JobError {
    /// `report_key` points at the per-record failures logged before the
    /// import stopped, when there were any.
    #[error("import failed: {source}")]
    Import {
        source: IngestError,
        report_key: Option<String>,
    },

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid export config: {0}")]
    Config(String),
}

impl JobError {
    /// Artifact to keep on the failed job.
    pub fn result_key(&self) -> Option<&str> {
        match self {
            JobError::Import { report_key, .. } => report_key.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_aborted_imports_carry_a_report() {
        let aborted = JobError::Import {
            source: IngestError::EmptySource,
            report_key: Some("errors/j.ndjson".into()),
        };
        assert_eq!(aborted.result_key(), Some("errors/j.ndjson"));
        assert_eq!(aborted.to_string(), "import failed: empty import source");

        let config = JobError::Config("bad".into());
        assert_eq!(config.result_key(), None);
    }
}
