//! Producer/consumer hand-off between the row serializer and the uploader.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use conduit_storage::BlobWriter;

use crate::error::ExportError;

/// Write-only destination for encoded export bytes.
#[async_trait]
pub trait ChunkSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError>;
}

#[async_trait]
impl ChunkSink for Vec<u8> {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Producer end of the export channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, ExportError>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, ExportError>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.tx.send(Ok(chunk)).await.map_err(|_| ExportError::SinkClosed)
    }
}

/// Rows and bytes of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportUpload {
    pub rows: u64,
    pub bytes: u64,
}

/// Consumer end of a running export.
///
/// A producer failure arrives as an `Err` item on `chunks`; the channel
/// closing without one means the producer finished cleanly. The producer
/// task yields the number of rows it wrote.
pub struct ExportStream {
    pub chunks: mpsc::Receiver<Result<Bytes, ExportError>>,
    pub producer: JoinHandle<u64>,
}

impl ExportStream {
    /// Drain the channel into `writer`. Any error on either side aborts the
    /// upload so no partial object is left behind.
    pub async fn upload_to(self, mut writer: BlobWriter) -> Result<ExportUpload, ExportError> {
        let ExportStream { mut chunks, producer } = self;

        while let Some(item) = chunks.recv().await {
            let failure = match item {
                Ok(chunk) => match writer.write(&chunk).await {
                    Ok(()) => continue,
                    Err(e) => ExportError::Upload(e),
                },
                Err(e) => e,
            };
            // closing the receiver stops the producer at its next send
            drop(chunks);
            abort(writer).await;
            return Err(failure);
        }

        let rows = match producer.await {
            Ok(rows) => rows,
            Err(e) => {
                abort(writer).await;
                return Err(ExportError::Producer(e.to_string()));
            }
        };
        let bytes = writer.finish().await?;
        debug!(rows, bytes, "export upload complete");
        Ok(ExportUpload { rows, bytes })
    }
}

async fn abort(writer: BlobWriter) {
    if let Err(e) = writer.abort().await {
        warn!(error = %e, "failed to abort export upload");
    }
}
