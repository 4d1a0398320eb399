//! Background worker loop: claim one job, run it, finalize it, repeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::Job;
use crate::runner::JobRunner;
use crate::store::JobStore;

pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(jobs: Arc<dyn JobStore>, runner: Arc<JobRunner>, poll_interval: Duration) -> Self {
        Self {
            jobs,
            runner,
            poll_interval,
        }
    }

    /// Claim and process at most one job. `Ok(None)` when the queue is empty.
    pub async fn tick(&self) -> Result<Option<Uuid>, QueueError> {
        let Some(job) = self.jobs.claim_next().await? else {
            return Ok(None);
        };
        let id = job.id;
        self.process(job).await;
        Ok(Some(id))
    }

    /// Run a claimed job and apply its terminal transition.
    pub async fn process(&self, job: Job) {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            resource = %job.resource,
            "job picked up"
        );

        let finalized = match self.runner.run(&job).await {
            Ok(done) => {
                info!(
                    job_id = %job.id,
                    processed = done.processed,
                    failed = done.failed,
                    result_key = ?done.result_key,
                    "job completed"
                );
                self.jobs.complete(job.id, &done).await
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "job failed");
                self.jobs.fail(job.id, &e.to_string(), e.result_key()).await
            }
        };
        if let Err(e) = finalized {
            error!(job_id = %job.id, error = %e, "failed to finalize job");
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// After a job finishes the queue is polled again immediately; the
    /// interval applies only when nothing was pending or the poll failed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "dispatcher started");

        while !*shutdown.borrow() {
            match self.tick().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "job poll failed, retrying in {:?}", self.poll_interval),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }
}
