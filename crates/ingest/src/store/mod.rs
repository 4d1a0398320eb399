//! Relational store seams used by the import and export pipelines.

pub mod pg;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

use conduit_core::{NewArticle, NewComment, NewUser, Resource, RowId};

use crate::error::StoreError;

pub use pg::PgStore;

/// Step of the per-article transaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleStage {
    Insert,
    TagCreate,
    TagLink,
    Commit,
}

#[derive(Debug)]
pub struct ArticleWriteError {
    pub stage: ArticleStage,
    pub message: String,
}

impl ArticleWriteError {
    pub fn new(stage: ArticleStage, err: impl fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ArticleWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.stage, self.message)
    }
}

/// Writes performed by an import.
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Multi-row upsert keyed on email. On conflict only the external id is
    /// refreshed.
    async fn upsert_users(&self, users: &[NewUser]) -> Result<u64, StoreError>;

    /// Find the user with this external id and return its article-author id,
    /// creating the article-author row if needed. `None` when no such user.
    async fn resolve_author(&self, user_external_id: &str) -> Result<Option<RowId>, StoreError>;

    async fn find_article(&self, external_id: &str) -> Result<Option<RowId>, StoreError>;

    /// Upsert the article keyed on slug and replace its tags, all in one
    /// transaction. Tags are left untouched when `tags` is empty.
    async fn save_article(&self, article: &NewArticle, tags: &[String]) -> Result<RowId, ArticleWriteError>;

    /// Insert a batch of comments atomically.
    async fn insert_comments(&self, comments: &[NewComment]) -> Result<u64, StoreError>;
}

/// Filters resolved to internal identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportQuery {
    Users { username: Option<String> },
    Articles { author_id: Option<RowId>, slug: Option<String> },
    Comments { article_id: Option<RowId> },
}

impl ExportQuery {
    pub fn resource(&self) -> Resource {
        match self {
            ExportQuery::Users { .. } => Resource::Users,
            ExportQuery::Articles { .. } => Resource::Articles,
            ExportQuery::Comments { .. } => Resource::Comments,
        }
    }
}

/// Reads performed by an export.
#[async_trait]
pub trait ExportStore: Send + Sync {
    /// Article-author id of the user with this username.
    async fn find_author_by_username(&self, username: &str) -> Result<Option<RowId>, StoreError>;

    async fn find_article_by_slug(&self, slug: &str) -> Result<Option<RowId>, StoreError>;

    async fn count(&self, query: &ExportQuery) -> Result<u64, StoreError>;

    /// Matching rows in id order, streamed.
    fn rows<'a>(&'a self, query: &'a ExportQuery) -> BoxStream<'a, Result<ExportRow, StoreError>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: Option<String>,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ArticleRow {
    pub id: Option<String>,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// External id of the author's user.
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: RowId,
    pub body: String,
    /// External id of the article.
    pub article_id: Option<String>,
    /// External id of the author's user.
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One exported row; serializes to the resource's column layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportRow {
    User(UserRow),
    Article(ArticleRow),
    Comment(CommentRow),
}

impl ExportRow {
    pub fn columns(resource: Resource) -> &'static [&'static str] {
        match resource {
            Resource::Users => &["id", "username", "email", "bio", "image"],
            Resource::Articles => &[
                "id",
                "slug",
                "title",
                "description",
                "body",
                "created_at",
                "updated_at",
                "author_id",
            ],
            Resource::Comments => &["id", "body", "article_id", "author_id", "created_at"],
        }
    }

    /// Field values in column order, as delimited-text cells.
    pub fn cells(&self) -> Vec<String> {
        fn opt(v: &Option<String>) -> String {
            v.clone().unwrap_or_default()
        }
        fn ts(v: &DateTime<Utc>) -> String {
            v.to_rfc3339()
        }
        match self {
            ExportRow::User(u) => vec![
                opt(&u.id),
                u.username.clone(),
                u.email.clone(),
                opt(&u.bio),
                opt(&u.image),
            ],
            ExportRow::Article(a) => vec![
                opt(&a.id),
                a.slug.clone(),
                a.title.clone(),
                a.description.clone(),
                a.body.clone(),
                ts(&a.created_at),
                ts(&a.updated_at),
                opt(&a.author_id),
            ],
            ExportRow::Comment(c) => vec![
                c.id.to_string(),
                c.body.clone(),
                opt(&c.article_id),
                opt(&c.author_id),
                ts(&c.created_at),
            ],
        }
    }
}
