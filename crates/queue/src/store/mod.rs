//! Job record persistence.

pub mod pg;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{Job, JobCompletion, NewJob};

pub use pg::PgJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a PENDING job. A reused idempotency key yields
    /// [`QueueError::Conflict`] naming the existing job.
    async fn create(&self, job: NewJob) -> Result<Job, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, QueueError>;

    /// Atomically move the earliest PENDING job to PROCESSING. Concurrent
    /// callers never receive the same job; `None` when nothing is pending.
    async fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    async fn set_total(&self, id: Uuid, total: u64) -> Result<(), QueueError>;

    async fn update_progress(&self, id: Uuid, processed: u64, failed: u64) -> Result<(), QueueError>;

    /// PROCESSING -> COMPLETED with final counters and result pointer.
    async fn complete(&self, id: Uuid, done: &JobCompletion) -> Result<(), QueueError>;

    /// PROCESSING -> FAILED with `message` as the error. `result_key` keeps
    /// a partial error report reachable.
    async fn fail(&self, id: Uuid, message: &str, result_key: Option<&str>) -> Result<(), QueueError>;
}

/// Counters are stored as BIGINT.
pub(crate) fn to_db(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
