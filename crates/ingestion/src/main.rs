//! DocChat index seeding
//!
//! Registers documents and rebuilds their vector indices ahead of the first
//! conversation:
//! 1. Registers every URL given on the command line or in `--manifest <file>`
//! 2. Rebuilds the per-document index of every stored document
//! 3. Optionally (`--fullstore`) rebuilds the merged index as well
//!
//! A manifest is a JSON array of `{ "url": ..., "metadata_map": {...} }`.

use docchat_common::{
    config::AppConfig, db::DbPool, embeddings::create_embedder, models::DocumentMetadataMap,
    storage::create_object_store, Repository, VERSION,
};
use docchat_index::{create_vector_store, IndexBuilder};
use docchat_ingestion::DocumentFetcher;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Debug, Deserialize)]
struct SeedEntry {
    url: String,
    #[serde(default)]
    metadata_map: Option<DocumentMetadataMap>,
}

#[derive(Debug, Default)]
struct SeedArgs {
    entries: Vec<SeedEntry>,
    fullstore: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<SeedArgs> {
    let mut parsed = SeedArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fullstore" => parsed.fullstore = true,
            "--manifest" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--manifest needs a file path"))?;
                let bytes = std::fs::read(&path)?;
                let entries: Vec<SeedEntry> = serde_json::from_slice(&bytes)?;
                parsed.entries.extend(entries);
            }
            url => parsed.entries.push(SeedEntry {
                url: url.to_string(),
                metadata_map: None,
            }),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting DocChat seeding v{}", VERSION);

    let args = parse_args(std::env::args().skip(1))?;

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }
    let repo = Repository::new(db.clone());

    for entry in args.entries {
        let document = repo.upsert_document(entry.url, entry.metadata_map).await?;
        info!(document_id = %document.id, url = %document.url, "Document registered");
    }

    let objects = create_object_store(&config.storage).await?;
    let embedder = create_embedder(&config.embedding)?;
    let vector_store = create_vector_store(&config.vector_store, Some(&db))?;
    let fetcher = Arc::new(DocumentFetcher::from_config(objects.clone(), &config)?);
    let builder = IndexBuilder::from_config(&config, objects, vector_store, embedder, fetcher);

    let documents = repo.list_documents().await?;
    info!(documents = documents.len(), "Rebuilding vector database");
    builder.rebuild_vector_db(&documents).await?;

    if args.fullstore {
        builder.build_single_index(&documents, true).await?;
    }

    info!("Seeding complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_urls_and_flags() {
        let parsed = parse_args(args(&["s3://docs/a.pdf", "--fullstore", "s3://docs/b.pdf"])).unwrap();
        assert!(parsed.fullstore);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].url, "s3://docs/b.pdf");
    }

    #[test]
    fn test_parse_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"[{"url": "s3://docs/minutes.pdf", "metadata_map": {"event_document": {
                "filename": "minutes.pdf", "department": "Parks", "location": "Hall",
                "date_published": "2024-03-01T00:00:00Z", "doc_type": "minutes"}}}]"#,
        )
        .unwrap();

        let parsed = parse_args(args(&["--manifest", path.to_str().unwrap()])).unwrap();
        let meta = parsed.entries[0].metadata_map.as_ref().unwrap();
        assert_eq!(
            meta.event_document.as_ref().unwrap().department.as_deref(),
            Some("Parks")
        );
    }

    #[test]
    fn test_manifest_flag_needs_path() {
        assert!(parse_args(args(&["--manifest"])).is_err());
    }
}
