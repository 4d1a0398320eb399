//! Dispatcher runs against in-memory job, data and blob stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use conduit_core::{Resource, RowId};
use conduit_ingest::store::{ExportQuery, ExportRow};
use conduit_ingest::{
    ExportFilters, ExportFormat, ExportStore, Exporter, ImportSettings, Importer, MemoryStore,
    StoreError,
};
use conduit_queue::{
    Dispatcher, ExportConfig, JobRunner, JobStatus, JobStore, MemoryJobStore, NewJob,
};
use conduit_storage::BlobStore;

struct Harness {
    jobs: Arc<MemoryJobStore>,
    data: Arc<MemoryStore>,
    blobs: Arc<BlobStore>,
    dispatcher: Arc<Dispatcher>,
}

impl Harness {
    fn new() -> Self {
        let data = Arc::new(MemoryStore::new());
        Self::with_export_store(data.clone(), data)
    }

    fn with_export_store(data: Arc<MemoryStore>, export: Arc<dyn ExportStore>) -> Self {
        let jobs = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(BlobStore::in_memory());
        let importer = Importer::new(data.clone(), ImportSettings::default());
        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            blobs.clone(),
            importer,
            Arc::new(Exporter::new(export)),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            jobs.clone(),
            runner,
            Duration::from_millis(10),
        ));
        Self {
            jobs,
            data,
            blobs,
            dispatcher,
        }
    }
}

/// Export store whose count pre-pass is deliberately wrong.
struct Miscounting(Arc<MemoryStore>);

#[async_trait]
impl ExportStore for Miscounting {
    async fn find_author_by_username(&self, username: &str) -> Result<Option<RowId>, StoreError> {
        self.0.find_author_by_username(username).await
    }

    async fn find_article_by_slug(&self, slug: &str) -> Result<Option<RowId>, StoreError> {
        self.0.find_article_by_slug(slug).await
    }

    async fn count(&self, _query: &ExportQuery) -> Result<u64, StoreError> {
        Ok(99)
    }

    fn rows<'a>(&'a self, query: &'a ExportQuery) -> BoxStream<'a, Result<ExportRow, StoreError>> {
        self.0.rows(query)
    }
}

/// Export store whose row stream breaks after `good` rows.
struct Interrupted {
    inner: Arc<MemoryStore>,
    good: usize,
}

#[async_trait]
impl ExportStore for Interrupted {
    async fn find_author_by_username(&self, username: &str) -> Result<Option<RowId>, StoreError> {
        self.inner.find_author_by_username(username).await
    }

    async fn find_article_by_slug(&self, slug: &str) -> Result<Option<RowId>, StoreError> {
        self.inner.find_article_by_slug(slug).await
    }

    async fn count(&self, query: &ExportQuery) -> Result<u64, StoreError> {
        self.inner.count(query).await
    }

    fn rows<'a>(&'a self, query: &'a ExportQuery) -> BoxStream<'a, Result<ExportRow, StoreError>> {
        self.inner
            .rows(query)
            .take(self.good)
            .chain(stream::once(async {
                Err(StoreError::Unavailable("connection lost".into()))
            }))
            .boxed()
    }
}

#[tokio::test]
async fn import_job_completes_with_counters() {
    let h = Harness::new();
    h.blobs
        .put_bytes(
            "imports/users/1_users.ndjson",
            Bytes::from_static(
                b"{\"id\":\"u1\",\"email\":\"a@x.com\",\"username\":\"alice\"}\n{\"id\":\"u2\",\"email\":\"b@x.com\",\"username\":\"bob\"}\n",
            ),
        )
        .await
        .unwrap();
    let job = h
        .jobs
        .create(NewJob::import(Resource::Users, "imports/users/1_users.ndjson"))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.tick().await.unwrap(), Some(job.id));

    let done = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!((done.processed_rows, done.failed_rows), (2, 0));
    assert!(done.result_key.is_none());
    assert!(done.error_message.is_none());
    assert_eq!(h.data.users().len(), 2);

    assert_eq!(h.dispatcher.tick().await.unwrap(), None);
}

#[tokio::test]
async fn import_failures_produce_error_report() {
    let h = Harness::new();
    h.blobs
        .put_bytes(
            "imports/articles/1_a.json",
            Bytes::from_static(b"[{\"id\":\"a1\",\"title\":\"Lost\",\"author_id\":\"nobody\"}]"),
        )
        .await
        .unwrap();
    let job = h
        .jobs
        .create(NewJob::import(Resource::Articles, "imports/articles/1_a.json"))
        .await
        .unwrap();

    h.dispatcher.tick().await.unwrap();

    let done = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.failed_rows, 1);
    let key = done.result_key.unwrap();
    assert_eq!(key, format!("errors/{}.ndjson", job.id));

    let report = h.blobs.get_bytes(&key).await.unwrap();
    let entry: serde_json::Value =
        serde_json::from_str(std::str::from_utf8(&report).unwrap().lines().next().unwrap()).unwrap();
    assert_eq!(entry["type"], "DEPENDENCY_ERROR");
    assert!(h.data.articles().is_empty());
}

#[tokio::test]
async fn missing_source_fails_the_job() {
    let h = Harness::new();
    let job = h
        .jobs
        .create(NewJob::import(Resource::Users, "imports/users/missing.ndjson"))
        .await
        .unwrap();

    h.dispatcher.tick().await.unwrap();

    let failed = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.is_some());
    assert!(failed.result_key.is_none());
}

#[tokio::test]
async fn export_total_is_corrected_to_rows_written() {
    let data = Arc::new(MemoryStore::new());
    data.add_user("u1", "a@x.com", "alice");
    data.add_user("u2", "b@x.com", "bob");
    let h = Harness::with_export_store(data.clone(), Arc::new(Miscounting(data)));

    let config = ExportConfig::new(ExportFormat::Csv, ExportFilters::new());
    let job = h
        .jobs
        .create(NewJob::export(Resource::Users, &config))
        .await
        .unwrap();

    h.dispatcher.tick().await.unwrap();

    let done = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.processed_rows, 2);
    assert_eq!(done.total_rows, done.processed_rows);

    let key = done.result_key.unwrap();
    assert_eq!(key, format!("exports/users/users-{}.csv", job.id));
    let body = h.blobs.get_bytes(&key).await.unwrap();
    assert_eq!(std::str::from_utf8(&body).unwrap().lines().count(), 3);
}

#[tokio::test]
async fn unknown_export_format_fails_the_job() {
    let h = Harness::new();
    let job = h
        .jobs
        .create(NewJob {
            source_key: "{\"format\":\"xml\"}".into(),
            ..NewJob::export(Resource::Users, &ExportConfig::default())
        })
        .await
        .unwrap();

    h.dispatcher.tick().await.unwrap();

    let failed = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("xml"));
}

#[tokio::test]
async fn run_loop_drains_queue_and_stops() {
    let h = Harness::new();
    h.data.add_user("u1", "a@x.com", "alice");
    let jobs: Vec<_> = [ExportFormat::Ndjson, ExportFormat::Json]
        .into_iter()
        .map(|f| ExportConfig::new(f, ExportFilters::new()))
        .collect();
    let mut ids = Vec::new();
    for config in &jobs {
        ids.push(
            h.jobs
                .create(NewJob::export(Resource::Users, config))
                .await
                .unwrap()
                .id,
        );
    }

    let (tx, rx) = tokio::sync::watch::channel(false);
    let dispatcher = h.dispatcher.clone();
    let worker = tokio::spawn(async move { dispatcher.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let all = h.jobs.all();
            if all.iter().all(|j| j.status.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();

    for id in ids {
        let job = h.jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 1);
    }
}

#[tokio::test]
async fn export_read_failure_fails_job_and_leaves_no_object() {
    let data = Arc::new(MemoryStore::new());
    data.add_user("u1", "a@x.com", "alice");
    data.add_user("u2", "b@x.com", "bob");
    data.add_user("u3", "c@x.com", "carol");
    let h = Harness::with_export_store(
        data.clone(),
        Arc::new(Interrupted {
            inner: data,
            good: 2,
        }),
    );

    let config = ExportConfig::new(ExportFormat::Ndjson, ExportFilters::new());
    let job = h
        .jobs
        .create(NewJob::export(Resource::Users, &config))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.tick().await.unwrap(), Some(job.id));

    let failed = h.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("connection lost"));
    assert!(failed.result_key.is_none());

    let key = format!("exports/users/users-{}.ndjson", job.id);
    assert!(h.blobs.get_bytes(&key).await.is_err());
}
