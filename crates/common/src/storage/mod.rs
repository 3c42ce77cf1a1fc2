//! Object storage for source documents and persisted index state
//!
//! Paths are `<bucket>/<key>`; an empty key addresses the bucket itself.
//! Document URLs may be `s3://bucket/key` or `http(s)://...`. The local
//! backend serves bucket URLs from files under its root and nothing else.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Turn a document URL into a time-limited URL that can be fetched directly
    async fn presign(&self, url: &str) -> Result<String>;

    /// Whether a bucket or object exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create a bucket (or directory) in the given region
    async fn mkdir(&self, path: &str, region: &str) -> Result<()>;

    /// Read an object; `None` when it does not exist
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace an object
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Split `s3://bucket/key` into `(bucket, key)`
pub fn parse_s3_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    (!bucket.is_empty() && !key.is_empty()).then_some((bucket, key))
}

/// Split a storage path into `(bucket, key)`; key may be empty
pub fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    path.split_once('/').unwrap_or((path, ""))
}

/// Build the configured object store, creating the index bucket when missing
pub async fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::from_config(config).await),
        StorageBackend::Local => Arc::new(LocalObjectStore::new(&config.local_root)),
    };

    if !store.exists(&config.bucket).await? {
        tracing::info!(bucket = %config.bucket, region = %config.region, "Creating storage bucket");
        store.mkdir(&config.bucket, &config.region).await?;
    }

    Ok(store)
}
