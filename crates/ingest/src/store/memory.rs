//! In-memory store for tests.
//!
//! Enabled under `cfg(test)` or the `test-utils` feature. Mirrors the
//! PostgreSQL semantics the pipelines depend on (upsert targets, article
//! transaction, atomic comment batches) and exposes failure switches.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use conduit_core::{NewArticle, NewComment, NewUser, RowId};

use super::{
    ArticleRow, ArticleStage, ArticleWriteError, CommentRow, ExportQuery, ExportRow, ExportStore,
    ImportStore, UserRow,
};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct MemUser {
    pub id: RowId,
    pub uuid: Option<String>,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct MemArticle {
    pub id: RowId,
    pub uuid: Option<String>,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub author_id: RowId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MemComment {
    pub id: RowId,
    pub body: String,
    pub article_id: RowId,
    pub author_id: RowId,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: Vec<MemUser>,
    /// (article_users.id, user_id)
    article_users: Vec<(RowId, RowId)>,
    articles: Vec<MemArticle>,
    tags: Vec<(RowId, String)>,
    article_tags: Vec<(RowId, RowId)>,
    comments: Vec<MemComment>,
    next_id: RowId,
}

impl Tables {
    fn next_id(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }

    fn author_user(&self, author_id: RowId) -> Option<&MemUser> {
        let (_, user_id) = self.article_users.iter().find(|(id, _)| *id == author_id)?;
        self.users.iter().find(|u| u.id == *user_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_user_upserts: AtomicBool,
    fail_comment_inserts: AtomicBool,
    fail_tag_links: AtomicBool,
    comment_insert_calls: AtomicU32,
    author_lookups: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        // a panicked test must not poison the others sharing this store
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── Seeding ──────────────────────────────────────────────────────

    pub fn add_user(&self, uuid: &str, email: &str, username: &str) -> RowId {
        let mut t = self.tables();
        let id = t.next_id();
        t.users.push(MemUser {
            id,
            uuid: Some(uuid.to_string()),
            email: email.to_string(),
            username: username.to_string(),
        });
        id
    }

    /// Seed an article authored by the user with `author_uuid`.
    pub fn add_article(&self, uuid: &str, slug: &str, author_uuid: &str) -> RowId {
        let mut t = self.tables();
        let user_id = t
            .users
            .iter()
            .find(|u| u.uuid.as_deref() == Some(author_uuid))
            .map(|u| u.id)
            .unwrap_or_default();
        let author_id = match t.article_users.iter().find(|(_, u)| *u == user_id) {
            Some((id, _)) => *id,
            None => {
                let id = t.next_id();
                t.article_users.push((id, user_id));
                id
            }
        };
        let id = t.next_id();
        t.articles.push(MemArticle {
            id,
            uuid: Some(uuid.to_string()),
            slug: slug.to_string(),
            title: slug.to_string(),
            description: String::new(),
            body: String::new(),
            author_id,
            created_at: Utc::now(),
        });
        id
    }

    // ── Failure switches ─────────────────────────────────────────────

    pub fn fail_user_upserts(&self, fail: bool) {
        self.fail_user_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_comment_inserts(&self, fail: bool) {
        self.fail_comment_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tag_links(&self, fail: bool) {
        self.fail_tag_links.store(fail, Ordering::SeqCst);
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn users(&self) -> Vec<MemUser> {
        self.tables().users.clone()
    }

    pub fn articles(&self) -> Vec<MemArticle> {
        self.tables().articles.clone()
    }

    pub fn comments(&self) -> Vec<MemComment> {
        self.tables().comments.clone()
    }

    pub fn tags_of(&self, slug: &str) -> Vec<String> {
        let t = self.tables();
        let Some(article) = t.articles.iter().find(|a| a.slug == slug) else {
            return Vec::new();
        };
        t.article_tags
            .iter()
            .filter(|(a, _)| *a == article.id)
            .filter_map(|(_, tag_id)| t.tags.iter().find(|(id, _)| id == tag_id))
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn comment_insert_calls(&self) -> u32 {
        self.comment_insert_calls.load(Ordering::SeqCst)
    }

    pub fn author_lookups(&self) -> u32 {
        self.author_lookups.load(Ordering::SeqCst)
    }

    fn export_rows(&self, query: &ExportQuery) -> Vec<ExportRow> {
        let t = self.tables();
        match query {
            ExportQuery::Users { username } => t
                .users
                .iter()
                .filter(|u| username.as_ref().map_or(true, |n| &u.username == n))
                .map(|u| {
                    ExportRow::User(UserRow {
                        id: u.uuid.clone(),
                        username: u.username.clone(),
                        email: u.email.clone(),
                        bio: None,
                        image: None,
                    })
                })
                .collect(),
            ExportQuery::Articles { author_id, slug } => t
                .articles
                .iter()
                .filter(|a| author_id.map_or(true, |id| a.author_id == id))
                .filter(|a| slug.as_ref().map_or(true, |s| &a.slug == s))
                .map(|a| {
                    ExportRow::Article(ArticleRow {
                        id: a.uuid.clone(),
                        slug: a.slug.clone(),
                        title: a.title.clone(),
                        description: a.description.clone(),
                        body: a.body.clone(),
                        created_at: a.created_at,
                        updated_at: a.created_at,
                        author_id: t.author_user(a.author_id).and_then(|u| u.uuid.clone()),
                    })
                })
                .collect(),
            ExportQuery::Comments { article_id } => t
                .comments
                .iter()
                .filter(|c| article_id.map_or(true, |id| c.article_id == id))
                .map(|c| {
                    ExportRow::Comment(CommentRow {
                        id: c.id,
                        body: c.body.clone(),
                        article_id: t
                            .articles
                            .iter()
                            .find(|a| a.id == c.article_id)
                            .and_then(|a| a.uuid.clone()),
                        author_id: t.author_user(c.author_id).and_then(|u| u.uuid.clone()),
                        created_at: c.created_at,
                    })
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn upsert_users(&self, users: &[NewUser]) -> Result<u64, StoreError> {
        if self.fail_user_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("user upsert disabled".into()));
        }
        let mut t = self.tables();
        for user in users {
            match t.users.iter_mut().find(|u| u.email == user.email) {
                Some(existing) => existing.uuid = Some(user.external_id.clone()),
                None => {
                    let id = t.next_id();
                    t.users.push(MemUser {
                        id,
                        uuid: Some(user.external_id.clone()),
                        email: user.email.clone(),
                        username: user.username.clone(),
                    });
                }
            }
        }
        Ok(users.len() as u64)
    }

    async fn resolve_author(&self, user_external_id: &str) -> Result<Option<RowId>, StoreError> {
        self.author_lookups.fetch_add(1, Ordering::SeqCst);
        let mut t = self.tables();
        let Some(user_id) = t
            .users
            .iter()
            .find(|u| u.uuid.as_deref() == Some(user_external_id))
            .map(|u| u.id)
        else {
            return Ok(None);
        };
        if let Some((id, _)) = t.article_users.iter().find(|(_, u)| *u == user_id) {
            return Ok(Some(*id));
        }
        let id = t.next_id();
        t.article_users.push((id, user_id));
        Ok(Some(id))
    }

    async fn find_article(&self, external_id: &str) -> Result<Option<RowId>, StoreError> {
        let t = self.tables();
        Ok(t.articles
            .iter()
            .find(|a| a.uuid.as_deref() == Some(external_id))
            .map(|a| a.id))
    }

    async fn save_article(&self, article: &NewArticle, tags: &[String]) -> Result<RowId, ArticleWriteError> {
        if !tags.is_empty() && self.fail_tag_links.load(Ordering::SeqCst) {
            return Err(ArticleWriteError::new(ArticleStage::TagLink, "tag link disabled"));
        }
        let mut t = self.tables();
        let article_id = match t.articles.iter_mut().find(|a| a.slug == article.slug) {
            Some(existing) => {
                existing.uuid = article.external_id.clone();
                existing.id
            }
            None => {
                let id = t.next_id();
                t.articles.push(MemArticle {
                    id,
                    uuid: article.external_id.clone(),
                    slug: article.slug.clone(),
                    title: article.title.clone(),
                    description: article.description.clone(),
                    body: article.body.clone(),
                    author_id: article.author_id,
                    created_at: Utc::now(),
                });
                id
            }
        };

        if !tags.is_empty() {
            let mut tag_ids = Vec::with_capacity(tags.len());
            for tag in tags {
                let id = match t.tags.iter().find(|(_, name)| name == tag) {
                    Some((id, _)) => *id,
                    None => {
                        let id = t.next_id();
                        t.tags.push((id, tag.clone()));
                        id
                    }
                };
                tag_ids.push(id);
            }
            t.article_tags.retain(|(a, _)| *a != article_id);
            for tag_id in tag_ids {
                if !t.article_tags.contains(&(article_id, tag_id)) {
                    t.article_tags.push((article_id, tag_id));
                }
            }
        }
        Ok(article_id)
    }

    async fn insert_comments(&self, comments: &[NewComment]) -> Result<u64, StoreError> {
        self.comment_insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_comment_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("comment insert disabled".into()));
        }
        let mut t = self.tables();
        for c in comments {
            let id = t.next_id();
            t.comments.push(MemComment {
                id,
                body: c.body.clone(),
                article_id: c.article_id,
                author_id: c.author_id,
                created_at: c.created_at.unwrap_or_else(Utc::now),
            });
        }
        Ok(comments.len() as u64)
    }
}

#[async_trait]
impl ExportStore for MemoryStore {
    async fn find_author_by_username(&self, username: &str) -> Result<Option<RowId>, StoreError> {
        let t = self.tables();
        let Some(user) = t.users.iter().find(|u| u.username == username) else {
            return Ok(None);
        };
        Ok(t.article_users
            .iter()
            .find(|(_, u)| *u == user.id)
            .map(|(id, _)| *id))
    }

    async fn find_article_by_slug(&self, slug: &str) -> Result<Option<RowId>, StoreError> {
        let t = self.tables();
        Ok(t.articles.iter().find(|a| a.slug == slug).map(|a| a.id))
    }

    async fn count(&self, query: &ExportQuery) -> Result<u64, StoreError> {
        Ok(self.export_rows(query).len() as u64)
    }

    fn rows<'a>(&'a self, query: &'a ExportQuery) -> BoxStream<'a, Result<ExportRow, StoreError>> {
        stream::iter(self.export_rows(query).into_iter().map(Ok)).boxed()
    }
}
