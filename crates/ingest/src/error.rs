//! Error types for decoding, importing and exporting.

use bytes::Bytes;
use thiserror::Error;

use conduit_storage::StorageError;

/// Per-record decode failure. Only `Io` is fatal to an import.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fatal import errors; these fail the job.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("empty import source")]
    EmptySource,

    #[error("unknown format, first byte: {0:?}")]
    UnknownFormat(char),

    #[error("failed to read source: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to open source: {0}")]
    Storage(#[from] StorageError),
}

/// A fatal import error with the counters and per-record failures
/// collected before the import stopped.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ImportFailure {
    #[source]
    pub error: IngestError,
    pub processed: u64,
    pub failed: u64,
    pub error_report: Option<Bytes>,
}

impl From<IngestError> for ImportFailure {
    fn from(error: IngestError) -> Self {
        Self {
            error,
            processed: 0,
            failed: 0,
            error_report: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format '{0}': must be ndjson, csv or json")]
    UnknownFormat(String),

    #[error("export query failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode row: {0}")]
    Encode(String),

    #[error("export consumer went away")]
    SinkClosed,

    #[error("failed to upload export: {0}")]
    Upload(#[from] StorageError),

    #[error("export producer crashed: {0}")]
    Producer(String),
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        ExportError::Encode(e.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Encode(e.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Encode(e.to_string())
    }
}
