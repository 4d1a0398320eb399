//! PostgreSQL implementation of the import/export store seams.
//!
//! Tables: `users`, `article_users` (one row per user who has authored
//! something), `articles`, `tags`, `article_tags`, `comments`. Optional
//! export filters are bound as nullable parameters so every statement is a
//! static string.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::PgPool;
use tracing::debug;

use conduit_core::{NewArticle, NewComment, NewUser, RowId};

use super::{
    ArticleRow, ArticleStage, ArticleWriteError, CommentRow, ExportQuery, ExportRow, ExportStore,
    ImportStore, UserRow,
};
use crate::error::StoreError;

// ── Import statements ────────────────────────────────────────────────

const UPSERT_USERS: &str = "
    INSERT INTO users (uuid, email, username, password_hash, created_at, updated_at)
    SELECT t.uuid, t.email, t.username, t.password_hash, now(), now()
    FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
         AS t(uuid, email, username, password_hash)
    ON CONFLICT (email) DO UPDATE SET uuid = EXCLUDED.uuid";

// Inserted row comes back from `ins`; an existing one from the join.
const RESOLVE_AUTHOR: &str = "
    WITH u AS (SELECT id FROM users WHERE uuid = $1 ORDER BY id LIMIT 1),
         ins AS (
            INSERT INTO article_users (user_id)
            SELECT id FROM u
            ON CONFLICT (user_id) DO NOTHING
            RETURNING id
         )
    SELECT id FROM ins
    UNION ALL
    SELECT au.id FROM article_users au JOIN u ON au.user_id = u.id
    LIMIT 1";

const UPSERT_ARTICLE: &str = "
    INSERT INTO articles (uuid, slug, title, description, body, author_id, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, now(), now())
    ON CONFLICT (slug) DO UPDATE SET uuid = EXCLUDED.uuid
    RETURNING id";

const UPSERT_TAG: &str = "
    INSERT INTO tags (tag) VALUES ($1)
    ON CONFLICT (tag) DO UPDATE SET tag = EXCLUDED.tag
    RETURNING id";

const INSERT_COMMENTS: &str = "
    INSERT INTO comments (body, article_id, author_id, created_at, updated_at)
    SELECT t.body, t.article_id, t.author_id, COALESCE(t.created_at, now()), now()
    FROM UNNEST($1::text[], $2::bigint[], $3::bigint[], $4::timestamptz[])
         AS t(body, article_id, author_id, created_at)";

/// Store backed by a connection pool; cheap to clone.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ImportStore for PgStore {
    async fn upsert_users(&self, users: &[NewUser]) -> Result<u64, StoreError> {
        if users.is_empty() {
            return Ok(0);
        }
        let uuids: Vec<&str> = users.iter().map(|u| u.external_id.as_str()).collect();
        let emails: Vec<&str> = users.iter().map(|u| u.email.as_str()).collect();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        let hashes: Vec<&str> = users.iter().map(|u| u.password_hash.as_str()).collect();

        let result = sqlx::query(UPSERT_USERS)
            .bind(&uuids)
            .bind(&emails)
            .bind(&names)
            .bind(&hashes)
            .execute(&self.pool)
            .await?;
        debug!(rows = result.rows_affected(), "users upserted");
        Ok(result.rows_affected())
    }

    async fn resolve_author(&self, user_external_id: &str) -> Result<Option<RowId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(RESOLVE_AUTHOR)
            .bind(user_external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn find_article(&self, external_id: &str) -> Result<Option<RowId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE uuid = $1 ORDER BY id LIMIT 1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn save_article(&self, article: &NewArticle, tags: &[String]) -> Result<RowId, ArticleWriteError> {
        use ArticleStage::*;

        // Dropping `tx` on any early return rolls the record back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ArticleWriteError::new(Insert, e))?;

        let article_id = sqlx::query_scalar::<_, i64>(UPSERT_ARTICLE)
            .bind(article.external_id.as_deref())
            .bind(&article.slug)
            .bind(&article.title)
            .bind(&article.description)
            .bind(&article.body)
            .bind(article.author_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ArticleWriteError::new(Insert, e))?;

        if !tags.is_empty() {
            let mut tag_ids = Vec::with_capacity(tags.len());
            for tag in tags {
                let id = sqlx::query_scalar::<_, i64>(UPSERT_TAG)
                    .bind(tag)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| ArticleWriteError::new(TagCreate, e))?;
                tag_ids.push(id);
            }

            sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
                .bind(article_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| ArticleWriteError::new(TagLink, e))?;
            sqlx::query(
                "INSERT INTO article_tags (article_id, tag_id)
                 SELECT $1, t FROM UNNEST($2::bigint[]) AS t
                 ON CONFLICT DO NOTHING",
            )
            .bind(article_id)
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| ArticleWriteError::new(TagLink, e))?;
        }

        tx.commit().await.map_err(|e| ArticleWriteError::new(Commit, e))?;
        Ok(article_id)
    }

    async fn insert_comments(&self, comments: &[NewComment]) -> Result<u64, StoreError> {
        if comments.is_empty() {
            return Ok(0);
        }
        let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
        let articles: Vec<i64> = comments.iter().map(|c| c.article_id).collect();
        let authors: Vec<i64> = comments.iter().map(|c| c.author_id).collect();
        let created: Vec<Option<DateTime<Utc>>> = comments.iter().map(|c| c.created_at).collect();

        let result = sqlx::query(INSERT_COMMENTS)
            .bind(&bodies)
            .bind(&articles)
            .bind(&authors)
            .bind(&created)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ExportStore for PgStore {
    async fn find_author_by_username(&self, username: &str) -> Result<Option<RowId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT au.id FROM article_users au
             JOIN users u ON u.id = au.user_id
             WHERE u.username = $1
             ORDER BY au.id LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_article_by_slug(&self, slug: &str) -> Result<Option<RowId>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn count(&self, query: &ExportQuery) -> Result<u64, StoreError> {
        let count = match query {
            ExportQuery::Users { username } => {
                sqlx::query_scalar::<_, i64>(COUNT_USERS)
                    .bind(username.as_deref())
                    .fetch_one(&self.pool)
                    .await?
            }
            ExportQuery::Articles { author_id, slug } => {
                sqlx::query_scalar::<_, i64>(COUNT_ARTICLES)
                    .bind(*author_id)
                    .bind(slug.as_deref())
                    .fetch_one(&self.pool)
                    .await?
            }
            ExportQuery::Comments { article_id } => {
                sqlx::query_scalar::<_, i64>(COUNT_COMMENTS)
                    .bind(*article_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    fn rows<'a>(&'a self, query: &'a ExportQuery) -> BoxStream<'a, Result<ExportRow, StoreError>> {
        match query {
            ExportQuery::Users { username } => sqlx::query_as::<_, UserRow>(SELECT_USERS)
                .bind(username.as_deref())
                .fetch(&self.pool)
                .map(|r| r.map(ExportRow::User).map_err(StoreError::from))
                .boxed(),
            ExportQuery::Articles { author_id, slug } => sqlx::query_as::<_, ArticleRow>(SELECT_ARTICLES)
                .bind(*author_id)
                .bind(slug.as_deref())
                .fetch(&self.pool)
                .map(|r| r.map(ExportRow::Article).map_err(StoreError::from))
                .boxed(),
            ExportQuery::Comments { article_id } => sqlx::query_as::<_, CommentRow>(SELECT_COMMENTS)
                .bind(*article_id)
                .fetch(&self.pool)
                .map(|r| r.map(ExportRow::Comment).map_err(StoreError::from))
                .boxed(),
        }
    }
}

// ── Export statements ────────────────────────────────────────────────
// Count and select share their predicates; a NULL parameter disables a filter.

const COUNT_USERS: &str = "
    SELECT COUNT(*) FROM users u
    WHERE ($1::text IS NULL OR u.username = $1)";

const COUNT_ARTICLES: &str = "
    SELECT COUNT(*) FROM articles a
    WHERE ($1::bigint IS NULL OR a.author_id = $1)
      AND ($2::text IS NULL OR a.slug = $2)";

const COUNT_COMMENTS: &str = "
    SELECT COUNT(*) FROM comments c
    WHERE ($1::bigint IS NULL OR c.article_id = $1)";

const SELECT_USERS: &str = "
    SELECT u.uuid AS id, u.username, u.email, u.bio, u.image
    FROM users u
    WHERE ($1::text IS NULL OR u.username = $1)
    ORDER BY u.id";

const SELECT_ARTICLES: &str = "
    SELECT a.uuid AS id, a.slug, a.title, a.description, a.body,
           a.created_at, a.updated_at, u.uuid AS author_id
    FROM articles a
    LEFT JOIN article_users au ON au.id = a.author_id
    LEFT JOIN users u ON u.id = au.user_id
    WHERE ($1::bigint IS NULL OR a.author_id = $1)
      AND ($2::text IS NULL OR a.slug = $2)
    ORDER BY a.id";

const SELECT_COMMENTS: &str = "
    SELECT c.id, c.body, a.uuid AS article_id, u.uuid AS author_id, c.created_at
    FROM comments c
    LEFT JOIN articles a ON a.id = c.article_id
    LEFT JOIN article_users au ON au.id = c.author_id
    LEFT JOIN users u ON u.id = au.user_id
    WHERE ($1::bigint IS NULL OR c.article_id = $1)
    ORDER BY c.id";
