//! Runs one claimed job through the matching pipeline.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use conduit_ingest::{Exporter, Importer, ProgressSink};
use conduit_storage::keys::{error_report_key, export_key};
use conduit_storage::BlobStore;

use crate::error::JobError;
use crate::job::{ExportConfig, Job, JobCompletion, JobType};
use crate::progress::JobProgress;
use crate::store::JobStore;

/// Chunks buffered between the export serializer and the uploader.
const EXPORT_CHANNEL_CAPACITY: usize = 16;

pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<BlobStore>,
    importer: Importer,
    exporter: Arc<Exporter>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        blobs: Arc<BlobStore>,
        importer: Importer,
        exporter: Arc<Exporter>,
    ) -> Self {
        Self {
            jobs,
            blobs,
            importer,
            exporter,
        }
    }

    pub async fn run(&self, job: &Job) -> Result<JobCompletion, JobError> {
        match job.job_type {
            JobType::Import => self.run_import(job).await,
            JobType::Export => self.run_export(job).await,
        }
    }

    /// The error report, if any, is stored before its key is returned. A
    /// fatal error still stores the failures logged before it.
    async fn run_import(&self, job: &Job) -> Result<JobCompletion, JobError> {
        let progress = JobProgress::new(self.jobs.clone(), job.id);
        let source = self.blobs.open_source(&job.source_key).await?;
        let outcome = match self
            .importer
            .import(job.resource, source, &job.source_key, &progress)
            .await
        {
            Ok(outcome) => outcome,
            Err(failure) => {
                let report_key = match failure.error_report {
                    Some(report) => match self.store_error_report(job, report).await {
                        Ok(key) => Some(key),
                        Err(e) => {
                            warn!(job_id = %job.id, error = %e, "failed to store partial error report");
                            None
                        }
                    },
                    None => None,
                };
                return Err(JobError::Import {
                    source: failure.error,
                    report_key,
                });
            }
        };

        let result_key = match outcome.error_report {
            Some(report) => Some(self.store_error_report(job, report).await?),
            None => None,
        };

        Ok(JobCompletion {
            processed: outcome.processed,
            failed: outcome.failed,
            total: outcome.processed + outcome.failed,
            result_key,
        })
    }

    async fn store_error_report(&self, job: &Job, report: Bytes) -> Result<String, JobError> {
        let key = error_report_key(&job.id.to_string());
        self.blobs.put_bytes(&key, report).await?;
        info!(job_id = %job.id, key = %key, "error report stored");
        Ok(key)
    }

    /// Count pre-pass, then stream rows straight into a multipart upload.
    async fn run_export(&self, job: &Job) -> Result<JobCompletion, JobError> {
        let config = ExportConfig::decode(&job.source_key)?;
        let format = config.format()?;

        let estimate = self.exporter.count(job.resource, &config.filters).await?;
        JobProgress::new(self.jobs.clone(), job.id)
            .set_total(estimate)
            .await;
        info!(job_id = %job.id, resource = %job.resource, format = %format, estimate, "export started");

        let key = export_key(job.resource, &job.id.to_string(), format.extension());
        let writer = self.blobs.writer(&key).await?;
        let upload = self
            .exporter
            .spawn(job.resource, format, config.filters, EXPORT_CHANNEL_CAPACITY)
            .upload_to(writer)
            .await?;

        info!(job_id = %job.id, rows = upload.rows, bytes = upload.bytes, key = %key, "export stored");
        Ok(JobCompletion {
            processed: upload.rows,
            failed: 0,
            total: upload.rows,
            result_key: Some(key),
        })
    }
}
