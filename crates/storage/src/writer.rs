use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};
use std::sync::Arc;
use tracing::debug;

use crate::error::StorageError;

/// Parts allowed in flight before `write` waits for the upload to catch up.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Streaming upload of a body whose length is not known up front.
///
/// Backed by a multipart upload; memory use is bounded by the part size times
/// [`MAX_IN_FLIGHT_PARTS`]. Dropping a writer without calling
/// [`BlobWriter::finish`] or [`BlobWriter::abort`] leaves an incomplete upload
/// for the store's lifecycle rules to reap.
pub struct BlobWriter {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    upload: WriteMultipart,
    written: u64,
}

impl BlobWriter {
    pub(crate) async fn open(store: Arc<dyn ObjectStore>, path: ObjectPath) -> Result<Self, StorageError> {
        let upload = store.put_multipart(&path).await?;
        Ok(Self {
            store,
            path,
            upload: WriteMultipart::new(upload),
            written: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.upload.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
        self.upload.write(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Complete the upload. Returns the total number of bytes stored.
    pub async fn finish(self) -> Result<u64, StorageError> {
        if self.written == 0 {
            // zero-part multipart completion is rejected by S3
            self.upload.abort().await?;
            self.store.put(&self.path, Bytes::new().into()).await?;
            debug!(path = %self.path, "stored empty object");
            return Ok(0);
        }
        self.upload.finish().await?;
        debug!(path = %self.path, bytes = self.written, "multipart upload complete");
        Ok(self.written)
    }

    pub async fn abort(self) -> Result<(), StorageError> {
        debug!(path = %self.path, "aborting multipart upload");
        self.upload.abort().await?;
        Ok(())
    }
}
