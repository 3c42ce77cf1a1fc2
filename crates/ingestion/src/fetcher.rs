//! Document fetcher
//!
//! Downloads a document through a signed URL into a per-call scratch
//! directory, parses it and returns chunked nodes. The scratch directory is
//! removed when the call returns, whether it succeeded or not.

use crate::chunker::{chunk_pages, ChunkingConfig};
use crate::parser::parse_file;
use async_trait::async_trait;
use docchat_common::config::AppConfig;
use docchat_common::errors::{AppError, FetchError, Result};
use docchat_common::metrics::record_fetch;
use docchat_common::models::Document;
use docchat_common::nodes::{DocumentLoader, TextNode};
use docchat_common::storage::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const DEFAULT_EXTENSION: &str = "pdf";

/// Fetches documents from object storage and turns them into nodes
pub struct DocumentFetcher {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    chunking: ChunkingConfig,
    scratch_dir: Option<PathBuf>,
}

impl DocumentFetcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        chunking: ChunkingConfig,
        scratch_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            store,
            http,
            chunking,
            scratch_dir,
        })
    }

    pub fn from_config(store: Arc<dyn ObjectStore>, config: &AppConfig) -> Result<Self> {
        Self::new(
            store,
            ChunkingConfig::from(&config.retrieval),
            config.storage.scratch_dir.as_ref().map(PathBuf::from),
        )
    }

    /// Fetch, parse and chunk one document
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn fetch(&self, document: &Document) -> Result<Vec<TextNode>> {
        let result = self.fetch_inner(document).await;
        match &result {
            Ok(nodes) => {
                record_fetch(true, nodes.len());
                info!(nodes = nodes.len(), "Document fetched");
            }
            Err(e) => {
                record_fetch(false, 0);
                warn!(error = %e, "Document fetch failed");
            }
        }
        result
    }

    async fn fetch_inner(&self, document: &Document) -> Result<Vec<TextNode>> {
        let access_url = self.store.presign(&document.url).await?;
        let extension = document
            .extension()
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        let scratch = self.scratch().await?;
        let path = scratch.path().join(format!("{}.{}", document.id, extension));

        let bytes = self.download(&access_url, &path).await?;
        debug!(bytes, path = %path.display(), "Downloaded to scratch");

        let pages = tokio::task::spawn_blocking(move || parse_file(&path, &extension))
            .await
            .map_err(|e| AppError::Internal {
                message: format!("Parser task failed: {}", e),
            })??;

        drop(scratch);

        Ok(chunk_pages(document.id, &pages, &self.chunking))
    }

    async fn scratch(&self) -> std::result::Result<TempDir, FetchError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("docchat-fetch-");
            b
        };

        let dir = match &self.scratch_dir {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Stream `url` into `dest` chunk by chunk; returns the byte count
    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, FetchError> {
        if let Some(local) = url.strip_prefix("file://") {
            return Ok(tokio::fs::copy(local, dest).await?);
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedUrl {
                url: redact(url).to_string(),
            });
        }

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: redact(url).to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl DocumentLoader for DocumentFetcher {
    async fn load(&self, document: &Document) -> Result<Vec<TextNode>> {
        self.fetch(document).await
    }
}

/// Signed URLs carry credentials in the query string
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn request_error(url: &str, err: reqwest::Error) -> FetchError {
    FetchError::Request {
        url: redact(url).to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use docchat_common::storage::LocalObjectStore;
    use tokio::net::TcpListener;

    fn fetcher(root: &Path, scratch: &Path) -> DocumentFetcher {
        DocumentFetcher::new(
            Arc::new(LocalObjectStore::new(root)),
            ChunkingConfig {
                chunk_size: 64,
                chunk_overlap: 8,
            },
            Some(scratch.to_path_buf()),
        )
        .unwrap()
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn scratch_is_empty(scratch: &Path) -> bool {
        std::fs::read_dir(scratch).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_fetch_bucket_document() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("docs")).unwrap();
        std::fs::write(
            root.path().join("docs/minutes.txt"),
            "The council approved the harbour budget.\u{000C}Road closures start in May.",
        )
        .unwrap();

        let document = Document::new("s3://docs/minutes.txt", None);
        let nodes = fetcher(root.path(), scratch.path())
            .fetch(&document)
            .await
            .unwrap();

        assert!(!nodes.is_empty());
        let id = document.id.to_string();
        assert!(nodes
            .iter()
            .all(|n| n.metadata.db_document_id.as_deref() == Some(id.as_str())));
        assert_eq!(nodes.last().unwrap().metadata.page_label.as_deref(), Some("2"));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let base = serve(Router::new().route(
            "/agenda.txt",
            get(|| async { "Agenda item one. Agenda item two." }),
        ))
        .await;
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let document = Document::new(format!("{}/agenda.txt", base), None);
        let nodes = fetcher(root.path(), scratch.path())
            .load(&document)
            .await
            .unwrap();

        assert!(nodes.iter().any(|n| n.text.contains("Agenda item one")));
    }

    #[tokio::test]
    async fn test_http_error_status_and_cleanup() {
        let base = serve(Router::new().route(
            "/missing.pdf",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let document = Document::new(format!("{}/missing.pdf?X-Amz-Signature=abc", base), None);
        let err = fetcher(root.path(), scratch.path())
            .fetch(&document)
            .await
            .unwrap_err();

        match err {
            AppError::Fetch(FetchError::Status { url, status }) => {
                assert_eq!(status, 404);
                assert!(!url.contains("Signature"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_parse_failure_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs/report.pdf"), b"not a pdf").unwrap();

        let document = Document::new("s3://docs/report.pdf", None);
        let err = fetcher(root.path(), scratch.path())
            .fetch(&document)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Fetch(FetchError::Parse { .. })));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let document = Document::new("ftp://example.com/file.pdf", None);
        let err = fetcher(root.path(), scratch.path())
            .fetch(&document)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Fetch(FetchError::UnsupportedUrl { .. })));
    }

    #[tokio::test]
    async fn test_files_outside_store_root_are_refused() {
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secrets.txt");
        std::fs::write(&secret, "DB_PASSWORD=hunter2").unwrap();

        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("docs")).unwrap();
        let fetcher = fetcher(root.path(), scratch.path());

        let escape = "../".repeat(root.path().components().count());
        for url in [
            format!("file://{}", secret.display()),
            format!("s3://docs/{}{}", escape, secret.display()),
        ] {
            let document = Document::new(url.clone(), None);
            let err = fetcher.fetch(&document).await.unwrap_err();
            assert!(
                matches!(err, AppError::Fetch(FetchError::UnsupportedUrl { .. })),
                "{url}: {err:?}"
            );
        }
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_redact_strips_query() {
        assert_eq!(
            redact("https://bucket.s3.amazonaws.com/a.pdf?X-Amz-Credential=x"),
            "https://bucket.s3.amazonaws.com/a.pdf"
        );
    }
}
