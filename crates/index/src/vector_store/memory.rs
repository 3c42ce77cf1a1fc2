use super::{VectorQuery, VectorRecord, VectorStore};
use crate::storage_context::PersistLayout;
use async_trait::async_trait;
use docchat_common::embeddings::cosine_similarity;
use docchat_common::errors::{AppError, Result};
use docchat_common::nodes::NodeWithScore;
use docchat_common::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    records: Vec<VectorRecord>,
}

/// Process-local vector store
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, VectorRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, VectorRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn get_vector(&self, key: &str) -> Result<Option<VectorRecord>> {
        Ok(self.read().get(key).cloned())
    }

    async fn set_vector(&self, record: VectorRecord) -> Result<()> {
        self.write().insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_vector(&self, key: &str) -> Result<bool> {
        Ok(self.write().remove(key).is_some())
    }

    async fn get_all_vectors(&self) -> Result<Vec<VectorRecord>> {
        let mut all: Vec<VectorRecord> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn get_nearest_vectors(&self, query: &VectorQuery) -> Result<Vec<NodeWithScore>> {
        let records = self.read();
        let mut scored: Vec<(f32, &VectorRecord)> = records
            .values()
            .filter(|r| query.matches(r))
            .map(|r| (cosine_similarity(&query.embedding, &r.embedding), r))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.key.cmp(&b.key)));

        Ok(scored
            .into_iter()
            .take(query.top_k)
            .map(|(score, r)| NodeWithScore {
                node: r.node.clone(),
                score: Some(score),
            })
            .collect())
    }

    async fn delete_index(&self, index_id: &str) -> Result<u64> {
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, r| r.index_id != index_id);
        Ok((before - records.len()) as u64)
    }

    async fn count(&self, index_id: &str) -> Result<u64> {
        Ok(self
            .read()
            .values()
            .filter(|r| r.index_id == index_id)
            .count() as u64)
    }

    async fn persist(
        &self,
        objects: &dyn ObjectStore,
        path: &str,
        layout: PersistLayout,
    ) -> Result<()> {
        let snapshot = {
            let mut records: Vec<VectorRecord> = self
                .read()
                .values()
                .filter(|r| layout.owns(&r.index_id))
                .cloned()
                .collect();
            records.sort_by(|a, b| a.key.cmp(&b.key));
            Snapshot { records }
        };

        debug!(path, records = snapshot.records.len(), "Persisting vectors");
        objects.write(path, serde_json::to_vec(&snapshot)?).await
    }

    async fn restore(&self, objects: &dyn ObjectStore, path: &str) -> Result<bool> {
        let Some(bytes) = objects.read(path).await? else {
            return Ok(false);
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| AppError::VectorStore {
                message: format!("Undecodable vector snapshot {}: {}", path, e),
            })?;

        debug!(path, records = snapshot.records.len(), "Restoring vectors");
        let mut records = self.write();
        for record in snapshot.records {
            records.insert(record.key.clone(), record);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MetadataFilter;
    use docchat_common::nodes::{NodeMetadata, TextNode};
    use docchat_common::storage::LocalObjectStore;
    use uuid::Uuid;

    fn record(index_id: &str, doc: Uuid, text: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord::new(
            index_id,
            TextNode::new(text, NodeMetadata::for_document(doc, Some("1".into()))),
            embedding,
        )
    }

    #[tokio::test]
    async fn test_nearest_with_filter() {
        let store = InMemoryVectorStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.set_vector(record("a", a, "close", vec![1.0, 0.0])).await.unwrap();
        store.set_vector(record("a", a, "far", vec![0.0, 1.0])).await.unwrap();
        store.set_vector(record("b", b, "other doc", vec![1.0, 0.0])).await.unwrap();

        let results = store
            .get_nearest_vectors(&VectorQuery {
                embedding: vec![1.0, 0.1],
                top_k: 5,
                index_id: None,
                filters: vec![MetadataFilter::exact("db_document_id", a.to_string())],
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.text, "close");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_top_k_and_delete_index() {
        let store = InMemoryVectorStore::new();
        let doc = Uuid::new_v4();
        for i in 0..4 {
            store
                .set_vector(record("idx", doc, &format!("n{}", i), vec![1.0, i as f32]))
                .await
                .unwrap();
        }

        let results = store
            .get_nearest_vectors(&VectorQuery {
                embedding: vec![1.0, 0.0],
                top_k: 3,
                index_id: Some("idx".into()),
                filters: vec![],
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        assert_eq!(store.count("idx").await.unwrap(), 4);
        assert_eq!(store.delete_index("idx").await.unwrap(), 4);
        assert!(store.get_all_vectors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = InMemoryVectorStore::new();
        let rec = record("idx", Uuid::new_v4(), "text", vec![0.5]);
        let key = rec.key.clone();

        store.set_vector(rec.clone()).await.unwrap();
        assert_eq!(store.get_vector(&key).await.unwrap(), Some(rec));
        assert!(store.delete_vector(&key).await.unwrap());
        assert!(!store.delete_vector(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_restores_only_owned_records() {
        let dir = tempfile::tempdir().unwrap();
        let objects = LocalObjectStore::new(dir.path());

        let store = InMemoryVectorStore::new();
        let doc = Uuid::new_v4();
        store.set_vector(record(&doc.to_string(), doc, "per doc", vec![1.0])).await.unwrap();
        store.set_vector(record("fullstore", doc, "merged", vec![1.0])).await.unwrap();
        store
            .persist(&objects, "bucket/vector_store.json", PersistLayout::PerDocument)
            .await
            .unwrap();

        let restored = InMemoryVectorStore::new();
        assert!(restored.restore(&objects, "bucket/vector_store.json").await.unwrap());
        let all = restored.get_all_vectors().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].node.text, "per doc");

        assert!(!restored.restore(&objects, "bucket/missing.json").await.unwrap());
    }
}
