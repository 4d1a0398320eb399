pub mod backend;
pub mod error;
pub mod keys;
pub mod writer;

use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use error::StorageError;
pub use writer::BlobWriter;

/// Buffered byte stream over a blob or an external URL.
pub type BlobReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Blob storage handle used by the job engine: streaming get/put by key,
/// external-URL sources and presigned download URLs.
pub struct BlobStore {
    backend: StorageBackend,
    http: reqwest::Client,
}

impl BlobStore {
    pub fn new(backend: StorageBackend) -> Self {
        Self {
            backend,
            http: reqwest::Client::new(),
        }
    }

    /// Create a BlobStore from config. Selects S3 when AWS is configured,
    /// otherwise a local directory under `DATA_DIR`.
    pub fn from_config(config: &conduit_core::Config) -> Result<Self, StorageError> {
        let backend = if config.aws.is_configured() {
            StorageBackend::S3(S3Backend::new(&config.aws)?)
        } else {
            StorageBackend::Local(LocalBackend::new(&config.storage.data_dir)?)
        };
        Ok(Self::new(backend))
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> Self {
        Self::new(StorageBackend::Memory(std::sync::Arc::new(
            object_store::memory::InMemory::new(),
        )))
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub async fn put_bytes(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let len = data.len();
        self.backend
            .store()
            .put(&self.backend.path(key), data.into())
            .await?;
        debug!(key, bytes = len, "blob stored");
        Ok(())
    }

    /// Open a streaming upload to `key`.
    pub async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError> {
        BlobWriter::open(self.backend.store(), self.backend.path(key)).await
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .backend
            .store()
            .get(&self.backend.path(key))
            .await
            .map_err(|e| StorageError::for_key(key, e))?;
        Ok(result.bytes().await?)
    }

    /// Stream the blob at `key` without loading it into memory.
    pub async fn reader(&self, key: &str) -> Result<BlobReader, StorageError> {
        let result = self
            .backend
            .store()
            .get(&self.backend.path(key))
            .await
            .map_err(|e| StorageError::for_key(key, e))?;
        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    /// Open an import source: `http(s)://` URLs are fetched, anything else
    /// is a blob key.
    pub async fn open_source(&self, source: &str) -> Result<BlobReader, StorageError> {
        if !is_external_url(source) {
            return self.reader(source).await;
        }

        info!(url = %source, "fetching external import source");
        let response = self.http.get(source).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(StorageError::Other(format!(
                "GET {} returned {}",
                source,
                response.status()
            )));
        }
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    /// Time-bounded download URL for `key`.
    pub async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.backend.signed_get_url(key, ttl).await
    }
}

pub fn is_external_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
