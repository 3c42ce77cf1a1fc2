use super::{parse_s3_url, ObjectStore};
use crate::errors::{AppError, FetchError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Object store over a local directory; buckets are subdirectories
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Map a storage path onto the root. Only plain segments are accepted,
    /// so a path can never leave the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(AppError::Storage {
                        message: format!("path escapes the storage root: {}", path),
                    });
                }
            }
        }
        Ok(resolved)
    }
}

fn io_err(what: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::Storage {
        message: format!("{} {} failed: {}", what, path.display(), err),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn presign(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }

        let (bucket, key) = parse_s3_url(url).ok_or_else(|| FetchError::UnsupportedUrl {
            url: url.to_string(),
        })?;

        let path = self
            .resolve(&format!("{}/{}", bucket, key))
            .map_err(|_| FetchError::UnsupportedUrl {
                url: url.to_string(),
            })?;
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir().map_err(FetchError::Io)?.join(path)
        };
        Ok(format!("file://{}", absolute.display()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|e| io_err("stat", &resolved, e))
    }

    async fn mkdir(&self, path: &str, _region: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| io_err("mkdir", &resolved, e))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let resolved = self.resolve(path)?;
        match tokio::fs::read(&resolved).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("read", &resolved, e)),
        }
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("mkdir", parent, e))?;
        }
        // Readers see either the old or the new object, never a partial one
        let staging = resolved.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| io_err("write", &staging, e))?;
        tokio::fs::rename(&staging, &resolved)
            .await
            .map_err(|e| io_err("rename", &resolved, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(!store.exists("bucket").await.unwrap());
        store.mkdir("bucket", "us-east-1").await.unwrap();
        assert!(store.exists("bucket").await.unwrap());

        assert_eq!(store.read("bucket/ctx/storage.json").await.unwrap(), None);
        store
            .write("bucket/ctx/storage.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.read("bucket/ctx/storage.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_presign_maps_bucket_urls_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let url = store.presign("s3://docs/a/report.pdf").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("docs/a/report.pdf"));

        let passthrough = store.presign("https://example.com/x.pdf").await.unwrap();
        assert_eq!(passthrough, "https://example.com/x.pdf");

        assert!(store.presign("ftp://example.com/x.pdf").await.is_err());
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("store"));

        for url in [
            "file:///etc/passwd",
            "s3://docs/../../secrets.txt",
            "s3://../outside/secrets.txt",
        ] {
            assert!(
                matches!(
                    store.presign(url).await,
                    Err(AppError::Fetch(FetchError::UnsupportedUrl { .. }))
                ),
                "{url} was accepted"
            );
        }

        assert!(store.read("bucket/../../secrets.txt").await.is_err());
        assert!(store.write("../escape.json", b"{}".to_vec()).await.is_err());
        assert!(!dir.path().join("escape.json").exists());

        // Current-dir segments stay inside the root
        store.write("bucket/./ctx.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.read("bucket/ctx.json").await.unwrap(), Some(b"{}".to_vec()));
    }
}
