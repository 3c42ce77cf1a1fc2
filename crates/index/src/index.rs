//! Vector store index
//!
//! An index is a named set of nodes whose embeddings live in a shared
//! [`VectorStore`]. The [`IndexStruct`] is what gets persisted to the index
//! store; the vectors themselves are owned by the vector store.

use crate::vector_store::{MetadataFilter, VectorQuery, VectorRecord, VectorStore};
use chrono::{DateTime, Utc};
use docchat_common::embeddings::Embedder;
use docchat_common::errors::{AppError, Result};
use docchat_common::metrics::record_retrieval;
use docchat_common::nodes::{NodeWithScore, TextNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Persisted description of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStruct {
    pub index_id: String,
    pub node_ids: Vec<String>,
    /// Source documents covered by the index
    #[serde(default)]
    pub ref_doc_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl IndexStruct {
    pub fn new(index_id: impl Into<String>, node_ids: Vec<String>) -> Self {
        Self {
            index_id: index_id.into(),
            node_ids,
            ref_doc_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct VectorStoreIndex {
    structure: IndexStruct,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorStoreIndex {
    /// Embed `nodes` and store them under `index_id`
    #[instrument(skip(nodes, vector_store, embedder), fields(nodes = nodes.len()))]
    pub async fn from_nodes(
        index_id: &str,
        nodes: Vec<TextNode>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts).await?
        };

        if embeddings.len() != nodes.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Expected {} embeddings, got {}",
                    nodes.len(),
                    embeddings.len()
                ),
            });
        }

        let mut structure = IndexStruct::new(index_id, Vec::with_capacity(nodes.len()));
        for (node, embedding) in nodes.into_iter().zip(embeddings) {
            structure.node_ids.push(node.id.clone());
            if let Some(doc_id) = &node.metadata.db_document_id {
                structure.ref_doc_ids.insert(doc_id.clone());
            }
            vector_store
                .set_vector(VectorRecord::new(index_id, node, embedding))
                .await?;
        }

        debug!(index_id, nodes = structure.node_ids.len(), "Index built");

        Ok(Self {
            structure,
            vector_store,
            embedder,
        })
    }

    /// Attach a persisted index struct to its stores
    pub fn from_struct(
        structure: IndexStruct,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            structure,
            vector_store,
            embedder,
        }
    }

    pub fn index_id(&self) -> &str {
        &self.structure.index_id
    }

    pub fn index_struct(&self) -> &IndexStruct {
        &self.structure
    }

    pub fn node_count(&self) -> usize {
        self.structure.node_ids.len()
    }

    /// Ids of the documents whose nodes are in this index
    pub fn document_ids(&self) -> &BTreeSet<String> {
        &self.structure.ref_doc_ids
    }

    /// Top-k nodes of this index for `query`, restricted by `filters`
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &[MetadataFilter],
    ) -> Result<Vec<NodeWithScore>> {
        let embedding = self.embedder.embed(query).await?;
        let results = self
            .vector_store
            .get_nearest_vectors(&VectorQuery {
                embedding,
                top_k,
                index_id: Some(self.structure.index_id.clone()),
                filters: filters.to_vec(),
            })
            .await?;

        record_retrieval(results.len());
        debug!(
            index_id = %self.structure.index_id,
            top_k,
            results = results.len(),
            "Retrieved nodes"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use docchat_common::embeddings::HashingEmbedder;
    use docchat_common::nodes::NodeMetadata;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_build_and_retrieve() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let doc = Uuid::new_v4();
        let nodes = vec![
            TextNode::new("harbour dredging budget", NodeMetadata::for_document(doc, Some("1".into()))),
            TextNode::new("library opening hours", NodeMetadata::for_document(doc, Some("2".into()))),
        ];

        let index = VectorStoreIndex::from_nodes("idx", nodes, store.clone(), embedder)
            .await
            .unwrap();
        assert_eq!(index.node_count(), 2);
        assert!(index.document_ids().contains(&doc.to_string()));
        assert_eq!(store.count("idx").await.unwrap(), 2);

        let results = index.retrieve("dredging budget", 1, &[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.text, "harbour dredging budget");
    }

    #[tokio::test]
    async fn test_empty_index() {
        let index = VectorStoreIndex::from_nodes(
            "empty",
            vec![],
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashingEmbedder::new(16)),
        )
        .await
        .unwrap();

        assert!(index.retrieve("anything", 3, &[]).await.unwrap().is_empty());
    }
}
