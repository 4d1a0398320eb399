//! Capped per-job log of record failures, serialized as NDJSON.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "DEPENDENCY_ERROR")]
    Dependency,
    #[serde(rename = "INSERT_ERROR")]
    Insert,
    #[serde(rename = "TAG_CREATE_ERROR")]
    TagCreate,
    #[serde(rename = "TAG_LINK_ERROR")]
    TagLink,
    #[serde(rename = "COMMIT_ERROR")]
    Commit,
    #[serde(rename = "BATCH_ERROR")]
    Batch,
    #[serde(rename = "DECODE_ERROR")]
    Decode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Dependency => "DEPENDENCY_ERROR",
            ErrorKind::Insert => "INSERT_ERROR",
            ErrorKind::TagCreate => "TAG_CREATE_ERROR",
            ErrorKind::TagLink => "TAG_LINK_ERROR",
            ErrorKind::Commit => "COMMIT_ERROR",
            ErrorKind::Batch => "BATCH_ERROR",
            ErrorKind::Decode => "DECODE_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub id: String,
    pub message: String,
    pub timestamp: String,
}

/// Counts every failure; keeps an entry only while the running failure
/// count is within `cap`.
pub struct ErrorLog {
    buf: Vec<u8>,
    failed: u64,
    logged: u64,
    cap: u64,
}

impl ErrorLog {
    pub fn new(cap: u64) -> Self {
        Self {
            buf: Vec::new(),
            failed: 0,
            logged: 0,
            cap,
        }
    }

    pub fn record(&mut self, kind: ErrorKind, id: &str, message: &str) {
        self.record_rows(kind, id, message, 1);
    }

    /// One entry covering `rows` failed rows. The entry is kept when the
    /// first of those rows falls within the cap.
    pub fn record_rows(&mut self, kind: ErrorKind, id: &str, message: &str, rows: u64) {
        if rows == 0 {
            return;
        }
        let first = self.failed + 1;
        self.failed += rows;
        if first > self.cap {
            return;
        }
        let entry = ErrorEntry {
            kind,
            id: id.to_string(),
            message: message.to_string(),
            timestamp: now_rfc3339(Utc::now()),
        };
        // serializing a struct of strings cannot fail
        if serde_json::to_writer(&mut self.buf, &entry).is_ok() {
            self.buf.push(b'\n');
            self.logged += 1;
        }
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn logged(&self) -> u64 {
        self.logged
    }

    /// NDJSON report, `None` when nothing failed.
    pub fn into_report(self) -> Option<Bytes> {
        (self.failed > 0).then(|| Bytes::from(self.buf))
    }
}

fn now_rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
