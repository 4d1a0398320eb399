use tracing::warn;

use conduit_core::NewComment;

use super::fields::{raw, text, timestamp};
use super::{resolve_article, resolve_author, BatchAccumulator, ErrorKind, ImportRun, ResolutionCache};
use crate::decode::{Record, RecordDecoder};
use crate::error::IngestError;
use crate::store::ImportStore;

struct PendingComment {
    source_id: String,
    comment: NewComment,
}

/// References a comment must carry before it is considered at all.
struct CommentRefs {
    id: String,
    body: String,
    article: String,
    author: String,
}

fn refs(record: &Record) -> Option<CommentRefs> {
    Some(CommentRefs {
        id: text(record, &["id"]).unwrap_or_default(),
        body: raw(record, "body").filter(|b| !b.trim().is_empty())?,
        article: text(record, &["article_id"])?,
        author: text(record, &["user_id", "author_id"])?,
    })
}

/// Comments are resolved one by one and inserted in batches with a bounded
/// retry. A batch that exhausts its retries is one `BATCH_ERROR` covering
/// every row in it.
pub(super) async fn import(
    store: &dyn ImportStore,
    decoder: &mut RecordDecoder,
    run: &mut ImportRun<'_>,
) -> Result<(), IngestError> {
    let mut articles = ResolutionCache::new();
    let mut authors = ResolutionCache::new();
    let mut batch = BatchAccumulator::new(run.settings.batch_size);

    while let Some(record) = run.next_record(decoder).await? {
        let Some(r) = refs(&record) else {
            continue;
        };

        let article = resolve_article(store, &mut articles, &r.article).await;
        let author = resolve_author(store, &mut authors, &r.author).await;
        let (article_id, author_id) = match (article, author) {
            (Ok(article_id), Ok(author_id)) => (article_id, author_id),
            (article, author) => {
                let message = [article.err(), author.err()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join("; ");
                run.fail(ErrorKind::Dependency, &r.id, &message);
                continue;
            }
        };

        batch.push(PendingComment {
            comment: NewComment {
                body: r.body,
                article_id,
                author_id,
                created_at: timestamp(&record, "created_at"),
            },
            source_id: r.id,
        });
        if batch.is_full() {
            flush(store, &mut batch, run).await;
        }
    }
    flush(store, &mut batch, run).await;
    Ok(())
}

async fn flush(
    store: &dyn ImportStore,
    batch: &mut BatchAccumulator<PendingComment>,
    run: &mut ImportRun<'_>,
) {
    let pending = batch.flush();
    let Some(last) = pending.last() else {
        return;
    };
    let last_id = last.source_id.clone();
    let comments: Vec<NewComment> = pending.into_iter().map(|p| p.comment).collect();
    let rows = comments.len() as u64;
    let attempts = run.settings.retry_attempts;

    for attempt in 1..=attempts {
        match store.insert_comments(&comments).await {
            Ok(_) => {
                run.succeeded(rows);
                run.report().await;
                return;
            }
            Err(e) => {
                warn!(attempt, attempts, rows, error = %e, "comment batch insert failed");
                // linear backoff after every failed attempt: step, 2*step, ...
                tokio::time::sleep(run.settings.retry_backoff * attempt).await;
                if attempt == attempts {
                    run.fail_rows(
                        ErrorKind::Batch,
                        &last_id,
                        &format!("comment batch of {rows} failed after {attempts} attempts: {e}"),
                        rows,
                    );
                }
            }
        }
    }
    run.report().await;
}
