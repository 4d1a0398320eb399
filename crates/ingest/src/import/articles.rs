use tracing::debug;

use conduit_core::{slugify, NewArticle};

use super::fields::{list, raw, text};
use super::{resolve_author, ErrorKind, ImportRun, ResolutionCache};
use crate::decode::{Record, RecordDecoder};
use crate::error::IngestError;
use crate::store::{ArticleStage, ImportStore};

/// Articles are written one transaction per record.
pub(super) async fn import(
    store: &dyn ImportStore,
    decoder: &mut RecordDecoder,
    run: &mut ImportRun<'_>,
) -> Result<(), IngestError> {
    let mut authors = ResolutionCache::new();
    let mut since_report = 0usize;

    while let Some(record) = run.next_record(decoder).await? {
        import_one(store, &record, &mut authors, run).await;

        since_report += 1;
        if since_report >= run.settings.batch_size {
            run.report().await;
            since_report = 0;
        }
    }

    debug!(
        cached = authors.len(),
        hits = authors.hits(),
        misses = authors.misses(),
        "author cache"
    );
    Ok(())
}

async fn import_one(
    store: &dyn ImportStore,
    record: &Record,
    authors: &mut ResolutionCache,
    run: &mut ImportRun<'_>,
) {
    let Some(title) = raw(record, "title").filter(|t| !t.trim().is_empty()) else {
        return;
    };
    let slug = text(record, &["slug"]).unwrap_or_else(|| slugify(&title));

    let mut tags = list(record, "tagList");
    if tags.is_empty() {
        tags = list(record, "tags");
    }

    let author_id = match text(record, &["author_id"]) {
        Some(author_ref) => match resolve_author(store, authors, &author_ref).await {
            Ok(id) => id,
            Err(message) => {
                run.fail(ErrorKind::Dependency, &slug, &message);
                return;
            }
        },
        None => {
            run.fail(ErrorKind::Dependency, &slug, "article has no author_id");
            return;
        }
    };

    let article = NewArticle {
        external_id: text(record, &["id", "uuid"]),
        slug,
        title,
        description: raw(record, "description").unwrap_or_default(),
        body: raw(record, "body").unwrap_or_default(),
        author_id,
    };

    match store.save_article(&article, &tags).await {
        Ok(_) => run.succeeded(1),
        Err(e) => run.fail(stage_kind(e.stage), &article.slug, &e.message),
    }
}

fn stage_kind(stage: ArticleStage) -> ErrorKind {
    match stage {
        ArticleStage::Insert => ErrorKind::Insert,
        ArticleStage::TagCreate => ErrorKind::TagCreate,
        ArticleStage::TagLink => ErrorKind::TagLink,
        ArticleStage::Commit => ErrorKind::Commit,
    }
}
