//! Vector stores
//!
//! Two backends behind one trait:
//! - [`InMemoryVectorStore`]: cosine similarity over a map, persisted as JSON
//! - [`PgVectorStore`]: a pgvector table queried through sqlx
//!
//! Every record belongs to exactly one index. Queries can be restricted to an
//! index and to nodes whose metadata matches a set of exact key/value filters.

mod memory;
mod postgres;

pub use memory::InMemoryVectorStore;
pub use postgres::PgVectorStore;

use crate::storage_context::PersistLayout;
use async_trait::async_trait;
use docchat_common::config::{VectorStoreConfig, VectorStoreProvider};
use docchat_common::db::DbPool;
use docchat_common::errors::{AppError, Result};
use docchat_common::nodes::{NodeWithScore, TextNode};
use docchat_common::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A node and its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Node id
    pub key: String,
    pub index_id: String,
    pub node: TextNode,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn new(index_id: impl Into<String>, node: TextNode, embedding: Vec<f32>) -> Self {
        Self {
            key: node.id.clone(),
            index_id: index_id.into(),
            node,
            embedding,
        }
    }
}

/// Exact match on a node metadata key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn exact(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Nearest-neighbour query
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    /// Restrict to one index
    pub index_id: Option<String>,
    /// All filters must match
    pub filters: Vec<MetadataFilter>,
}

impl VectorQuery {
    pub(crate) fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(index_id) = &self.index_id {
            if &record.index_id != index_id {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|f| record.node.metadata.get(&f.key) == Some(f.value.as_str()))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn get_vector(&self, key: &str) -> Result<Option<VectorRecord>>;

    /// Insert or replace by key
    async fn set_vector(&self, record: VectorRecord) -> Result<()>;

    async fn delete_vector(&self, key: &str) -> Result<bool>;

    async fn get_all_vectors(&self) -> Result<Vec<VectorRecord>>;

    /// Highest-scoring records first; ties broken by key
    async fn get_nearest_vectors(&self, query: &VectorQuery) -> Result<Vec<NodeWithScore>>;

    /// Remove every record of an index, returning how many were removed
    async fn delete_index(&self, index_id: &str) -> Result<u64>;

    /// Number of records stored under an index
    async fn count(&self, index_id: &str) -> Result<u64>;

    /// Write the records owned by `layout` to `path`. Stores that persist on
    /// their own ignore this.
    async fn persist(
        &self,
        _objects: &dyn ObjectStore,
        _path: &str,
        _layout: PersistLayout,
    ) -> Result<()> {
        Ok(())
    }

    /// Reload records written by [`VectorStore::persist`]. Returns false when
    /// nothing was persisted at `path`.
    async fn restore(&self, _objects: &dyn ObjectStore, _path: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Create the configured vector store
pub fn create_vector_store(
    config: &VectorStoreConfig,
    db: Option<&DbPool>,
) -> Result<Arc<dyn VectorStore>> {
    match config.provider {
        VectorStoreProvider::Memory => Ok(Arc::new(InMemoryVectorStore::new())),
        VectorStoreProvider::Pgvector => {
            let db = db.ok_or_else(|| AppError::Configuration {
                message: "vector_store.provider = pgvector requires a database".into(),
            })?;
            Ok(Arc::new(PgVectorStore::new(
                db.sqlx_pool().clone(),
                &config.table,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::nodes::NodeMetadata;
    use uuid::Uuid;

    #[test]
    fn test_query_matching() {
        let doc = Uuid::new_v4();
        let node = TextNode::new("text", NodeMetadata::for_document(doc, Some("4".into())));
        let record = VectorRecord::new("idx", node, vec![1.0]);

        let mut query = VectorQuery {
            embedding: vec![1.0],
            top_k: 3,
            index_id: Some("idx".into()),
            filters: vec![MetadataFilter::exact("db_document_id", doc.to_string())],
        };
        assert!(query.matches(&record));

        query.filters.push(MetadataFilter::exact("page_label", "5"));
        assert!(!query.matches(&record));

        query.filters.clear();
        query.index_id = Some("other".into());
        assert!(!query.matches(&record));
    }

    #[test]
    fn test_memory_provider_needs_no_database() {
        let config = VectorStoreConfig {
            provider: VectorStoreProvider::Memory,
            table: "unused".into(),
        };
        assert!(create_vector_store(&config, None).is_ok());

        let config = VectorStoreConfig {
            provider: VectorStoreProvider::Pgvector,
            table: "pg_vector_store".into(),
        };
        assert!(matches!(
            create_vector_store(&config, None),
            Err(AppError::Configuration { .. })
        ));
    }
}
