//! Domain entities the job engine reads and writes.
//!
//! The shapes mirror the application tables (`users`, `article_users`,
//! `articles`, `tags`, `comments`). Internal identifiers are database
//! serials; external identifiers are the client-facing UUID strings carried
//! in import and export files.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Internal numeric row identifier.
pub type RowId = i64;

/// Password hash assigned to imported users. It never verifies, so imported
/// accounts must go through a reset before anyone can log in.
pub const IMPORTED_PASSWORD_HASH: &str = "$2a$14$P...";

/// Domain entity a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Users,
    Articles,
    Comments,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Users, Resource::Articles, Resource::Comments];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Articles => "articles",
            Resource::Comments => "comments",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "users" => Ok(Resource::Users),
            "articles" => Ok(Resource::Articles),
            "comments" => Ok(Resource::Comments),
            _ => Err(CoreError::UnknownResource(s.to_string())),
        }
    }
}

/// A user ready to be upserted (conflict target: `email`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

/// An article ready to be upserted (conflict target: `slug`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    /// Absent when the source record carries no `id`.
    pub external_id: Option<String>,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    /// `article_users.id` of the author.
    pub author_id: RowId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub body: String,
    pub article_id: RowId,
    /// `article_users.id` of the author.
    pub author_id: RowId,
    pub created_at: Option<DateTime<Utc>>,
}

/// Derive a slug from a title: lower-cased, spaces replaced with hyphens.
///
/// No collision detection: two titles that derive the same slug upsert into
/// the same article row.
pub fn slugify(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_parse_is_case_insensitive() {
        assert_eq!("Users".parse::<Resource>().unwrap(), Resource::Users);
        assert_eq!(" articles ".parse::<Resource>().unwrap(), Resource::Articles);
        assert_eq!("COMMENTS".parse::<Resource>().unwrap(), Resource::Comments);
    }

    #[test]
    fn resource_parse_rejects_unknown() {
        let err = "tags".parse::<Resource>().unwrap_err();
        assert!(err.to_string().contains("tags"));
    }

    #[test]
    fn resource_serde_is_lowercase() {
        let json = serde_json::to_string(&Resource::Articles).unwrap();
        assert_eq!(json, r#""articles""#);
        let parsed: Resource = serde_json::from_str(r#""comments""#).unwrap();
        assert_eq!(parsed, Resource::Comments);
    }

    #[test]
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("Hello Big World"), "hello-big-world");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
    }
}
