use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::ObjectStore;
use tracing::info;

use conduit_core::config::AwsConfig;

use crate::error::StorageError;

/// Unified storage backend wrapping object_store.
pub enum StorageBackend {
    Local(LocalBackend),
    S3(S3Backend),
    #[cfg(any(test, feature = "test-utils"))]
    Memory(Arc<object_store::memory::InMemory>),
}

impl StorageBackend {
    /// Get an Arc-wrapped ObjectStore.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        match self {
            StorageBackend::Local(b) => b.store.clone(),
            StorageBackend::S3(b) => b.store.clone(),
            #[cfg(any(test, feature = "test-utils"))]
            StorageBackend::Memory(m) => m.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageBackend::S3(_))
    }

    /// Key prefix prepended to every logical key (e.g. "production").
    pub fn prefix(&self) -> &str {
        match self {
            StorageBackend::S3(b) => &b.prefix,
            _ => "",
        }
    }

    /// Physical object path for a logical key.
    pub fn path(&self, key: &str) -> ObjectPath {
        let key = key.trim_start_matches('/');
        match self.prefix() {
            "" => ObjectPath::from(key),
            prefix => ObjectPath::from(format!("{}/{}", prefix, key)),
        }
    }

    /// Presigned GET URL. Only the S3 backend can sign.
    pub async fn signed_get_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        match self {
            StorageBackend::S3(b) => {
                let url = b.signer.signed_url(http::Method::GET, &self.path(key), ttl).await?;
                Ok(url.to_string())
            }
            _ => Err(StorageError::NotConfigured(
                "presigned URLs require the S3 backend".into(),
            )),
        }
    }
}

/// Local filesystem backend.
pub struct LocalBackend {
    pub store: Arc<dyn ObjectStore>,
    pub data_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        info!("Storage: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            data_dir: canonical,
        })
    }
}

/// S3 backend. Keeps the concrete client around for URL signing.
pub struct S3Backend {
    pub store: Arc<dyn ObjectStore>,
    signer: Arc<AmazonS3>,
    pub bucket: String,
    pub prefix: String,
}

impl S3Backend {
    pub fn new(aws: &AwsConfig) -> Result<Self, StorageError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new()
            .with_region(&aws.region)
            .with_bucket_name(bucket);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        // LocalStack and friends: path-style requests, plain http allowed
        if let Some(ref endpoint) = aws.endpoint_url {
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_endpoint(&endpoint_url)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint_url.starts_with("http://"));
        }

        let s3 = Arc::new(builder.build()?);

        let prefix = aws
            .s3_prefix
            .as_deref()
            .unwrap_or("")
            .trim_matches('/')
            .to_string();

        info!(
            "Storage: S3 backend s3://{}/{} (region: {})",
            bucket, prefix, aws.region
        );

        Ok(Self {
            store: s3.clone(),
            signer: s3,
            bucket: bucket.to_string(),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_backend_creates_missing_dir() {
        let tmp = std::env::temp_dir().join("conduit-storage-backend-test");
        std::fs::remove_dir_all(&tmp).ok();
        let backend = LocalBackend::new(&tmp).unwrap();
        assert!(tmp.exists());
        assert!(!StorageBackend::Local(backend).is_remote());
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn s3_requires_bucket() {
        let aws = AwsConfig {
            region: "us-east-1".into(),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            session_token: None,
            s3_bucket: None,
            s3_prefix: None,
            endpoint_url: None,
        };
        assert!(matches!(S3Backend::new(&aws), Err(StorageError::NotConfigured(_))));
    }

    #[test]
    fn s3_prefix_applies_to_paths() {
        let aws = AwsConfig {
            region: "us-east-1".into(),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            session_token: None,
            s3_bucket: Some("bucket".into()),
            s3_prefix: Some("/staging/".into()),
            endpoint_url: Some("http://localhost:4566".into()),
        };
        let backend = StorageBackend::S3(S3Backend::new(&aws).unwrap());
        assert!(backend.is_remote());
        assert_eq!(backend.path("exports/users/a.csv").as_ref(), "staging/exports/users/a.csv");
    }

    #[tokio::test]
    async fn s3_signs_get_urls() {
        let aws = AwsConfig {
            region: "us-east-1".into(),
            access_key_id: Some("key".into()),
            secret_access_key: Some("secret".into()),
            session_token: None,
            s3_bucket: Some("bucket".into()),
            s3_prefix: None,
            endpoint_url: Some("http://localhost:4566".into()),
        };
        let backend = StorageBackend::S3(S3Backend::new(&aws).unwrap());
        let url = backend
            .signed_get_url("errors/job.ndjson", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.contains("errors/job.ndjson"));
        assert!(url.contains("X-Amz-Expires=900"));
    }
}
