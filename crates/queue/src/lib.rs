//! Durable job queue for bulk imports and exports.
//!
//! The API layer creates PENDING [`Job`]s through a [`JobStore`]; a
//! [`Dispatcher`] claims them one at a time and hands each to the
//! [`JobRunner`], which drives the `conduit-ingest` pipelines.

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod progress;
pub mod runner;
pub mod store;

pub use dispatcher::Dispatcher;
pub use error::{JobError, QueueError};
pub use job::{ExportConfig, Job, JobCompletion, JobStatus, JobType, NewJob};
pub use progress::JobProgress;
pub use runner::JobRunner;
pub use store::{JobStore, PgJobStore};

#[cfg(any(test, feature = "test-utils"))]
pub use store::memory::MemoryJobStore;
