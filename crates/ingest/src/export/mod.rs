//! Export pipeline: store rows to a streamed document.
//!
//! Rows are pulled from the store one at a time, encoded, and handed to a
//! [`ChunkSink`] in bounded chunks; nothing holds the full result set.

pub mod sink;
pub mod writer;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use conduit_core::Resource;

use crate::error::{ExportError, StoreError};
use crate::store::{ExportQuery, ExportStore};

pub use sink::{ChannelSink, ChunkSink, ExportStream, ExportUpload};
pub use writer::RecordWriter;

/// Encoded bytes accumulated before a chunk is handed to the sink.
const CHUNK_BYTES: usize = 64 * 1024;

/// Flat filter map; each resource picks the keys it understands.
pub type ExportFilters = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Ndjson,
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Ndjson => "ndjson",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Ndjson => "application/x-ndjson",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blank selects the default (`ndjson`).
impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "ndjson" => Ok(ExportFormat::Ndjson),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

fn filter<'a>(filters: &'a ExportFilters, key: &str) -> Option<&'a str> {
    filters.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Translate a filter map into a store query.
///
/// Reference filters (`author` username, `article` slug) are resolved to
/// internal ids first; `None` means a reference did not resolve and the
/// export matches no rows. Unknown keys are ignored.
pub async fn resolve_query(
    store: &dyn ExportStore,
    resource: Resource,
    filters: &ExportFilters,
) -> Result<Option<ExportQuery>, StoreError> {
    let query = match resource {
        Resource::Users => ExportQuery::Users {
            username: filter(filters, "username").map(str::to_string),
        },
        Resource::Articles => {
            let author_id = match filter(filters, "author") {
                Some(username) => match store.find_author_by_username(username).await? {
                    Some(id) => Some(id),
                    None => return Ok(None),
                },
                None => None,
            };
            ExportQuery::Articles {
                author_id,
                slug: filter(filters, "slug").map(str::to_string),
            }
        }
        Resource::Comments => {
            let article_id = match filter(filters, "article") {
                Some(slug) => match store.find_article_by_slug(slug).await? {
                    Some(id) => Some(id),
                    None => return Ok(None),
                },
                None => None,
            };
            ExportQuery::Comments { article_id }
        }
    };
    Ok(Some(query))
}

pub struct Exporter {
    store: Arc<dyn ExportStore>,
}

impl Exporter {
    pub fn new(store: Arc<dyn ExportStore>) -> Self {
        Self { store }
    }

    /// Row-count pre-pass with the same filters as [`Exporter::export`].
    pub async fn count(&self, resource: Resource, filters: &ExportFilters) -> Result<u64, ExportError> {
        match resolve_query(self.store.as_ref(), resource, filters).await? {
            Some(query) => Ok(self.store.count(&query).await?),
            None => Ok(0),
        }
    }

    /// Stream every matching row into `sink`. Returns the row count.
    pub async fn export(
        &self,
        resource: Resource,
        format: ExportFormat,
        filters: &ExportFilters,
        sink: &mut dyn ChunkSink,
    ) -> Result<u64, ExportError> {
        let query = resolve_query(self.store.as_ref(), resource, filters).await?;
        let mut writer = RecordWriter::new(format, resource);

        match &query {
            Some(query) => {
                let mut rows = self.store.rows(query);
                while let Some(row) = rows.try_next().await? {
                    writer.write_row(&row)?;
                    if writer.buffered() >= CHUNK_BYTES {
                        sink.write_chunk(Bytes::from(writer.take())).await?;
                    }
                }
            }
            None => debug!(resource = %resource, ?filters, "filter reference unresolved, exporting nothing"),
        }

        let rows = writer.rows();
        let tail = writer.finish();
        if !tail.is_empty() {
            sink.write_chunk(Bytes::from(tail)).await?;
        }
        info!(resource = %resource, format = %format, rows, "export streamed");
        Ok(rows)
    }

    /// Run [`Exporter::export`] on its own task, connected to the returned
    /// stream by a channel of `capacity` chunks.
    pub fn spawn(
        self: &Arc<Self>,
        resource: Resource,
        format: ExportFormat,
        filters: ExportFilters,
        capacity: usize,
    ) -> ExportStream {
        let (tx, chunks) = mpsc::channel(capacity.max(1));
        let exporter = Arc::clone(self);

        let producer = tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx.clone());
            match exporter.export(resource, format, &filters, &mut sink).await {
                Ok(rows) => rows,
                Err(ExportError::SinkClosed) => {
                    debug!(resource = %resource, "export consumer closed early");
                    0
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "export producer failed");
                    // the consumer may already be gone
                    let _ = tx.send(Err(e)).await;
                    0
                }
            }
        });

        ExportStream { chunks, producer }
    }
}
