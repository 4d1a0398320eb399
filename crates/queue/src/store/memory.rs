//! In-memory job store for tests.
//!
//! One mutex guards every record, which gives `claim_next` the same
//! exclusivity the row lock gives the PostgreSQL store.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{to_db, JobStore};
use crate::error::QueueError;
use crate::job::{Job, JobCompletion, JobStatus, NewJob};

#[derive(Default)]
pub struct MemoryJobStore {
    /// Insertion order doubles as creation order.
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn all(&self) -> Vec<Job> {
        self.jobs().clone()
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut Job)) -> Result<(), QueueError> {
        let mut jobs = self.jobs();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(QueueError::NotFound(id))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a terminal transition to a PROCESSING job.
    fn finish(&self, id: Uuid, f: impl FnOnce(&mut Job)) -> Result<(), QueueError> {
        let mut jobs = self.jobs();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::NotProcessing { id, status: job.status });
        }
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, QueueError> {
        let mut jobs = self.jobs();
        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = jobs.iter().find(|j| j.idempotency_key.as_ref() == Some(key)) {
                return Err(QueueError::Conflict { job_id: existing.id });
            }
        }
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: new.job_type,
            resource: new.resource,
            status: JobStatus::Pending,
            source_key: new.source_key,
            result_key: None,
            total_rows: 0,
            processed_rows: 0,
            failed_rows: 0,
            idempotency_key: new.idempotency_key,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs().iter().find(|j| j.id == id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, QueueError> {
        Ok(self
            .jobs()
            .iter()
            .find(|j| j.idempotency_key.as_deref() == Some(key))
            .map(|j| j.id))
    }

    async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs();
        let Some(job) = jobs.iter_mut().find(|j| j.status == JobStatus::Pending) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn set_total(&self, id: Uuid, total: u64) -> Result<(), QueueError> {
        self.update(id, |job| job.total_rows = to_db(total))
    }

    async fn update_progress(&self, id: Uuid, processed: u64, failed: u64) -> Result<(), QueueError> {
        self.update(id, |job| {
            job.processed_rows = to_db(processed);
            job.failed_rows = to_db(failed);
        })
    }

    async fn complete(&self, id: Uuid, done: &JobCompletion) -> Result<(), QueueError> {
        self.finish(id, |job| {
            job.status = JobStatus::Completed;
            job.processed_rows = to_db(done.processed);
            job.failed_rows = to_db(done.failed);
            job.total_rows = to_db(done.total);
            job.result_key = done.result_key.clone();
            job.error_message = None;
        })
    }

    async fn fail(&self, id: Uuid, message: &str, result_key: Option<&str>) -> Result<(), QueueError> {
        self.finish(id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
            job.result_key = result_key.map(str::to_string);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conduit_core::Resource;

    use super::*;

    #[tokio::test]
    async fn idempotency_key_conflicts() {
        let store = MemoryJobStore::new();
        let first = store
            .create(NewJob::import(Resource::Users, "a").with_idempotency_key(Some("k1".into())))
            .await
            .unwrap();
        let err = store
            .create(NewJob::import(Resource::Users, "b").with_idempotency_key(Some("k1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Conflict { job_id } if job_id == first.id));
        assert_eq!(store.all().len(), 1);

        // blank keys are not keys
        store
            .create(NewJob::import(Resource::Users, "c").with_idempotency_key(Some(" ".into())))
            .await
            .unwrap();
        store
            .create(NewJob::import(Resource::Users, "d").with_idempotency_key(Some(" ".into())))
            .await
            .unwrap();
        assert_eq!(store.all().len(), 3);
    }

    #[tokio::test]
    async fn claims_are_exclusive() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create(NewJob::import(Resource::Users, "a")).await.unwrap();

        let claims: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_next().await.unwrap() })
            })
            .collect();

        let mut won = Vec::new();
        for claim in claims {
            if let Some(job) = claim.await.unwrap() {
                won.push(job.id);
            }
        }
        assert_eq!(won, vec![job.id]);
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn claims_earliest_first() {
        let store = MemoryJobStore::new();
        let first = store.create(NewJob::import(Resource::Users, "a")).await.unwrap();
        let second = store.create(NewJob::import(Resource::Users, "b")).await.unwrap();

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, second.id);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_transitions() {
        let store = MemoryJobStore::new();
        let job = store.create(NewJob::import(Resource::Users, "a")).await.unwrap();
        store.claim_next().await.unwrap();

        store
            .fail(job.id, "boom", Some("errors/partial.ndjson"))
            .await
            .unwrap();
        let failed = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.result_key.as_deref(), Some("errors/partial.ndjson"));

        assert!(matches!(
            store.fail(Uuid::new_v4(), "x", None).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn terminal_transitions_need_a_claim() {
        let store = MemoryJobStore::new();
        let job = store.create(NewJob::import(Resource::Users, "a")).await.unwrap();
        let done = JobCompletion {
            processed: 1,
            failed: 0,
            total: 1,
            result_key: None,
        };

        assert!(matches!(
            store.complete(job.id, &done).await,
            Err(QueueError::NotProcessing { status: JobStatus::Pending, .. })
        ));

        store.claim_next().await.unwrap();
        store.complete(job.id, &done).await.unwrap();

        // a finished job is never rewritten
        assert!(matches!(
            store.fail(job.id, "late", None).await,
            Err(QueueError::NotProcessing { status: JobStatus::Completed, .. })
        ));
        let kept = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(kept.status, JobStatus::Completed);
        assert!(kept.error_message.is_none());
    }
}
