//! Import pipeline: decoded records to store writes.
//!
//! Per-record problems (missing dependency, failed insert) are counted and
//! logged, never fatal. Only an unreadable source or an undetectable format
//! ends an import early.

mod articles;
pub mod batch;
pub mod cache;
mod comments;
pub mod error_log;
pub mod fields;
mod users;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use conduit_core::config::JobsConfig;
use conduit_core::{Resource, RowId};
use conduit_storage::BlobReader;

use crate::decode::{Record, RecordDecoder, SourceFormat};
use crate::error::{DecodeError, ImportFailure, IngestError};
use crate::progress::ProgressSink;
use crate::store::ImportStore;

pub use batch::BatchAccumulator;
pub use cache::ResolutionCache;
pub use error_log::{ErrorEntry, ErrorKind, ErrorLog};

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub max_error_log: u64,
    pub max_record_bytes: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Rows between progress log lines.
    pub progress_interval: u64,
}

impl From<&JobsConfig> for ImportSettings {
    fn from(jobs: &JobsConfig) -> Self {
        Self {
            batch_size: jobs.batch_size.max(1),
            max_error_log: jobs.max_error_log,
            max_record_bytes: jobs.max_record_bytes,
            retry_attempts: jobs.batch_retry_attempts.max(1),
            retry_backoff: Duration::from_millis(jobs.batch_retry_backoff_ms),
            progress_interval: jobs.progress_interval.max(1),
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub format: SourceFormat,
    pub processed: u64,
    pub failed: u64,
    /// Records the decoder could not parse; not counted as failed.
    pub skipped: u64,
    /// NDJSON error report, present when `failed > 0`.
    pub error_report: Option<Bytes>,
}

pub struct Importer {
    store: Arc<dyn ImportStore>,
    settings: ImportSettings,
}

impl Importer {
    pub fn new(store: Arc<dyn ImportStore>, settings: ImportSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Detect the source format and import every record.
    pub async fn import(
        &self,
        resource: Resource,
        source: BlobReader,
        source_key: &str,
        progress: &dyn ProgressSink,
    ) -> Result<ImportOutcome, ImportFailure> {
        let mut decoder =
            RecordDecoder::open(source, source_key, self.settings.max_record_bytes).await?;
        info!(resource = %resource, format = %decoder.format(), "format detected");
        self.import_records(resource, &mut decoder, progress).await
    }

    pub async fn import_records(
        &self,
        resource: Resource,
        decoder: &mut RecordDecoder,
        progress: &dyn ProgressSink,
    ) -> Result<ImportOutcome, ImportFailure> {
        let mut run = ImportRun::new(&self.settings, progress, resource);
        let store = self.store.as_ref();

        let result = match resource {
            Resource::Users => users::import(store, decoder, &mut run).await,
            Resource::Articles => articles::import(store, decoder, &mut run).await,
            Resource::Comments => comments::import(store, decoder, &mut run).await,
        };
        run.report().await;

        if let Err(error) = result {
            warn!(
                resource = %resource,
                processed = run.processed,
                failed = run.errors.failed(),
                error = %error,
                "import aborted"
            );
            return Err(ImportFailure {
                error,
                processed: run.processed,
                failed: run.errors.failed(),
                error_report: run.errors.into_report(),
            });
        }

        info!(
            resource = %resource,
            processed = run.processed,
            failed = run.errors.failed(),
            skipped = run.skipped,
            "import finished"
        );
        Ok(ImportOutcome {
            format: decoder.format(),
            processed: run.processed,
            failed: run.errors.failed(),
            skipped: run.skipped,
            error_report: run.errors.into_report(),
        })
    }
}

/// Counters and error log for one import.
pub(crate) struct ImportRun<'a> {
    settings: &'a ImportSettings,
    progress: &'a dyn ProgressSink,
    resource: Resource,
    errors: ErrorLog,
    processed: u64,
    skipped: u64,
    /// Items the decoder produced, parse failures included.
    seen: u64,
}

impl<'a> ImportRun<'a> {
    fn new(settings: &'a ImportSettings, progress: &'a dyn ProgressSink, resource: Resource) -> Self {
        Self {
            settings,
            progress,
            resource,
            errors: ErrorLog::new(settings.max_error_log),
            processed: 0,
            skipped: 0,
            seen: 0,
        }
    }

    /// Next usable record. Malformed records are skipped uncounted;
    /// oversized ones become a `DECODE_ERROR`; read errors are fatal.
    async fn next_record(&mut self, decoder: &mut RecordDecoder) -> Result<Option<Record>, IngestError> {
        loop {
            let item = decoder.next_record().await;
            if !matches!(item, Ok(None)) {
                self.seen += 1;
            }
            match item {
                Ok(record) => return Ok(record),
                Err(DecodeError::Malformed(reason)) => {
                    self.skipped += 1;
                    debug!(record = self.seen, %reason, "skipping malformed record");
                }
                Err(e @ DecodeError::Oversized { .. }) => {
                    let id = format!("record #{}", self.seen);
                    self.fail(ErrorKind::Decode, &id, &e.to_string());
                }
                Err(DecodeError::Io(e)) => return Err(IngestError::Read(e)),
            }
        }
    }

    fn succeeded(&mut self, rows: u64) {
        let before = self.processed;
        self.processed += rows;
        let interval = self.settings.progress_interval;
        if self.processed / interval > before / interval {
            info!(
                resource = %self.resource,
                processed = self.processed,
                failed = self.errors.failed(),
                "import progress"
            );
        }
    }

    fn fail(&mut self, kind: ErrorKind, id: &str, message: &str) {
        self.fail_rows(kind, id, message, 1);
    }

    fn fail_rows(&mut self, kind: ErrorKind, id: &str, message: &str, rows: u64) {
        debug!(kind = kind.as_str(), id, message, rows, "record failed");
        self.errors.record_rows(kind, id, message, rows);
    }

    /// Publish the live counters.
    async fn report(&self) {
        self.progress.update(self.processed, self.errors.failed()).await;
    }
}

/// External user id to article-author id, through the job cache.
async fn resolve_author(
    store: &dyn ImportStore,
    cache: &mut ResolutionCache,
    user_external_id: &str,
) -> Result<RowId, String> {
    if let Some(id) = cache.get(user_external_id) {
        return Ok(id);
    }
    match store.resolve_author(user_external_id).await {
        Ok(Some(id)) => {
            cache.insert(user_external_id, id);
            Ok(id)
        }
        Ok(None) => Err(format!("author not found: {user_external_id}")),
        Err(e) => Err(format!("author lookup failed for {user_external_id}: {e}")),
    }
}

/// External article id to article id, through the job cache.
async fn resolve_article(
    store: &dyn ImportStore,
    cache: &mut ResolutionCache,
    article_external_id: &str,
) -> Result<RowId, String> {
    if let Some(id) = cache.get(article_external_id) {
        return Ok(id);
    }
    match store.find_article(article_external_id).await {
        Ok(Some(id)) => {
            cache.insert(article_external_id, id);
            Ok(id)
        }
        Ok(None) => Err(format!("article not found: {article_external_id}")),
        Err(e) => Err(format!("article lookup failed for {article_external_id}: {e}")),
    }
}
