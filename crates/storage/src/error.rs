use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Map an object_store error, surfacing missing keys as `NotFound`.
    pub(crate) fn for_key(key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::ObjectStore(other),
        }
    }
}
