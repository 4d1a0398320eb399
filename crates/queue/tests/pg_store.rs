//! PostgreSQL job store against a live database.
//!
//! Needs `DATABASE_URL` pointing at a database with `migrations/` applied.
//! Ignored by default; run with `cargo test -p conduit-queue -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use conduit_core::Resource;
use conduit_queue::{JobCompletion, JobStatus, JobStore, NewJob, PgJobStore, QueueError};

async fn store() -> PgJobStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("connect");
    PgJobStore::new(pool)
}

#[ignore]
#[tokio::test]
async fn duplicate_idempotency_key_returns_original_job() {
    let store = store().await;
    let key = format!("test-{}", Uuid::new_v4());

    let first = store
        .create(NewJob::import(Resource::Users, "imports/users/a.ndjson").with_idempotency_key(Some(key.clone())))
        .await
        .unwrap();
    let err = store
        .create(NewJob::import(Resource::Users, "imports/users/b.ndjson").with_idempotency_key(Some(key.clone())))
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Conflict { job_id } if job_id == first.id));
    assert_eq!(store.find_by_idempotency_key(&key).await.unwrap(), Some(first.id));
}

#[ignore]
#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let store = Arc::new(store().await);
    for _ in 0..4 {
        store.create(NewJob::import(Resource::Users, "imports/users/c.ndjson")).await.unwrap();
    }

    let claims: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_next().await.unwrap() })
        })
        .collect();

    let mut seen = HashSet::new();
    for claim in claims {
        if let Some(job) = claim.await.unwrap() {
            assert_eq!(job.status, JobStatus::Processing);
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert!(!seen.is_empty());
}

#[ignore]
#[tokio::test]
async fn completion_overwrites_counters_of_claimed_job() {
    let store = store().await;
    let job = store.create(NewJob::import(Resource::Comments, "imports/comments/d.json")).await.unwrap();

    store.set_total(job.id, 10).await.unwrap();
    store.update_progress(job.id, 4, 1).await.unwrap();
    assert!(matches!(
        store.fail(job.id, "not claimed", None).await,
        Err(QueueError::NotProcessing { status: JobStatus::Pending, .. })
    ));

    // other tests share the table; claim until ours comes up
    while let Some(claimed) = store.claim_next().await.unwrap() {
        if claimed.id == job.id {
            break;
        }
    }
    store
        .complete(
            job.id,
            &JobCompletion {
                processed: 8,
                failed: 2,
                total: 10,
                result_key: Some(format!("errors/{}.ndjson", job.id)),
            },
        )
        .await
        .unwrap();

    let done = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!((done.processed_rows, done.failed_rows, done.total_rows), (8, 2, 10));
    assert!(matches!(
        store.fail(job.id, "late", None).await,
        Err(QueueError::NotProcessing { status: JobStatus::Completed, .. })
    ));
    assert!(matches!(store.fail(Uuid::new_v4(), "x", None).await, Err(QueueError::NotFound(_))));
}
