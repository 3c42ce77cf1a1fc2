//! Index builder
//!
//! Resolves documents to vector indices, either one per document or one
//! merged index. Persisted indices are loaded without re-embedding; anything
//! that fails to load is handled according to the [`RebuildPolicy`].
//!
//! Builds of the same index id are serialized within the process. A task
//! that waited on another task's build reuses the result if it was persisted
//! after the waiting call started.

use crate::index::VectorStoreIndex;
use crate::locks::KeyedLocks;
use crate::storage_context::{PersistLayout, StorageContext, FULLSTORE_INDEX_ID};
use crate::vector_store::VectorStore;
use chrono::{DateTime, Utc};
use docchat_common::cache::TtlCache;
use docchat_common::config::AppConfig;
use docchat_common::embeddings::Embedder;
use docchat_common::errors::{AppError, IndexLoadError, Result};
use docchat_common::metrics::record_index_build;
use docchat_common::models::Document;
use docchat_common::nodes::{DocumentLoader, TextNode};
use docchat_common::storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Storage contexts keyed by [`PersistLayout::cache_key`]
pub type StorageContextCache = TtlCache<&'static str, Arc<StorageContext>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildAction {
    Rebuild,
    Fail,
}

/// What to do with each kind of load failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildPolicy {
    pub on_not_found: RebuildAction,
    pub on_corrupt: RebuildAction,
    pub on_partial_mismatch: RebuildAction,
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        Self {
            on_not_found: RebuildAction::Rebuild,
            on_corrupt: RebuildAction::Rebuild,
            on_partial_mismatch: RebuildAction::Rebuild,
        }
    }
}

impl RebuildPolicy {
    /// Rebuild missing indices but surface corrupt ones
    pub fn strict() -> Self {
        Self {
            on_corrupt: RebuildAction::Fail,
            ..Self::default()
        }
    }

    pub fn action_for(&self, err: &IndexLoadError) -> RebuildAction {
        match err {
            IndexLoadError::NotFound { .. } => self.on_not_found,
            IndexLoadError::Corrupt { .. } => self.on_corrupt,
            IndexLoadError::PartialMismatch { .. } => self.on_partial_mismatch,
        }
    }
}

pub struct IndexBuilder {
    objects: Arc<dyn ObjectStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    loader: Arc<dyn DocumentLoader>,
    cache: Arc<StorageContextCache>,
    locks: Arc<KeyedLocks>,
    persist_dir: String,
    policy: RebuildPolicy,
}

impl IndexBuilder {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn DocumentLoader>,
        cache: Arc<StorageContextCache>,
        persist_dir: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            vector_store,
            embedder,
            loader,
            cache,
            locks: Arc::new(KeyedLocks::new()),
            persist_dir: persist_dir.into(),
            policy: RebuildPolicy::default(),
        }
    }

    /// Builder with a storage context cache sized from configuration
    pub fn from_config(
        config: &AppConfig,
        objects: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Self {
        let cache = Arc::new(TtlCache::new(
            "storage_context",
            config.index_cache.capacity,
            config.index_cache_ttl(),
        ));
        Self::new(
            objects,
            vector_store,
            embedder,
            loader,
            cache,
            config.persist_dir(),
        )
    }

    pub fn with_policy(mut self, policy: RebuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    async fn storage_context(&self, layout: PersistLayout) -> Result<Arc<StorageContext>> {
        let persist_dir = self.persist_dir.clone();
        let objects = self.objects.clone();
        let vector_store = self.vector_store.clone();

        self.cache
            .get_or_try_insert_with(layout.cache_key(), || async move {
                StorageContext::load_or_create(&persist_dir, layout, objects, vector_store)
                    .await
                    .map(Arc::new)
            })
            .await
    }

    /// Returns `Ok` when the policy says to rebuild
    fn check_policy(&self, err: IndexLoadError) -> Result<()> {
        match self.policy.action_for(&err) {
            RebuildAction::Fail => {
                error!(error = %err, "Index load failed, rebuild disabled by policy");
                Err(AppError::IndexLoad(err))
            }
            RebuildAction::Rebuild => {
                match &err {
                    IndexLoadError::Corrupt { .. } => {
                        error!(error = %err, "Persisted index is corrupt, rebuilding")
                    }
                    IndexLoadError::PartialMismatch { .. } => {
                        warn!(error = %err, "Persisted indices incomplete, rebuilding")
                    }
                    IndexLoadError::NotFound { .. } => {
                        info!(error = %err, "No persisted index, building")
                    }
                }
                Ok(())
            }
        }
    }

    /// Load or build one index per document, keyed by document id
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn build_doc_id_to_index_map(
        &self,
        documents: &[Document],
    ) -> Result<HashMap<String, VectorStoreIndex>> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let context = self.storage_context(PersistLayout::PerDocument).await?;
        let ids: Vec<String> = documents.iter().map(|d| d.id.to_string()).collect();

        match context.load_index_structs(&ids).await {
            Ok(structs) => {
                let map: HashMap<String, VectorStoreIndex> = structs
                    .into_iter()
                    .map(|s| (s.index_id.clone(), self.attach(s)))
                    .collect();
                record_index_build(
                    PersistLayout::PerDocument.as_str(),
                    "loaded",
                    map.len(),
                    timer.elapsed().as_secs_f64(),
                );
                info!(indices = map.len(), "Loaded indices from storage");
                return Ok(map);
            }
            Err(err) => self.check_policy(err)?,
        }

        let mut map = HashMap::with_capacity(documents.len());
        for document in documents {
            let index = self
                .rebuild_document(&context, document, Some(started_at))
                .await?;
            map.insert(document.id.to_string(), index);
        }

        record_index_build(
            PersistLayout::PerDocument.as_str(),
            "rebuilt",
            map.len(),
            timer.elapsed().as_secs_f64(),
        );
        Ok(map)
    }

    /// Unconditionally re-fetch, re-embed and persist every document's index
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn rebuild_vector_db(
        &self,
        documents: &[Document],
    ) -> Result<HashMap<String, VectorStoreIndex>> {
        let timer = Instant::now();
        let context = self.storage_context(PersistLayout::PerDocument).await?;

        let mut map = HashMap::with_capacity(documents.len());
        for document in documents {
            let index = self.rebuild_document(&context, document, None).await?;
            map.insert(document.id.to_string(), index);
        }

        record_index_build(
            PersistLayout::PerDocument.as_str(),
            "rebuilt",
            map.len(),
            timer.elapsed().as_secs_f64(),
        );
        info!(indices = map.len(), "Vector database rebuilt");
        Ok(map)
    }

    /// Load or build the merged index over all `documents`.
    ///
    /// A rebuild always re-fetches and re-embeds every document.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    pub async fn build_single_index(
        &self,
        documents: &[Document],
        force: bool,
    ) -> Result<VectorStoreIndex> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let context = self.storage_context(PersistLayout::Fullstore).await?;

        if force {
            info!("Forced rebuild of merged index");
        } else {
            match self.load_merged(&context, documents).await {
                Ok(index) => {
                    record_index_build(
                        PersistLayout::Fullstore.as_str(),
                        "loaded",
                        1,
                        timer.elapsed().as_secs_f64(),
                    );
                    return Ok(index);
                }
                Err(err) => self.check_policy(err)?,
            }
        }

        let _guard = self.locks.lock(FULLSTORE_INDEX_ID).await;

        if !force {
            if let Ok(index) = self.load_merged(&context, documents).await {
                if index.index_struct().created_at >= started_at {
                    info!("Merged index was rebuilt concurrently, reusing it");
                    return Ok(index);
                }
            }
        }

        let removed = context.vector_store().delete_index(FULLSTORE_INDEX_ID).await?;

        let mut nodes: Vec<TextNode> = Vec::new();
        for document in documents {
            nodes.extend(self.loader.load(document).await?);
        }

        context.add_documents(FULLSTORE_INDEX_ID, &nodes).await?;
        let index = VectorStoreIndex::from_nodes(
            FULLSTORE_INDEX_ID,
            nodes,
            context.vector_store().clone(),
            self.embedder.clone(),
        )
        .await?;
        context.persist_index(index.index_struct()).await?;

        record_index_build(
            PersistLayout::Fullstore.as_str(),
            "rebuilt",
            documents.len(),
            timer.elapsed().as_secs_f64(),
        );
        info!(
            nodes = index.node_count(),
            removed_vectors = removed,
            "Merged index rebuilt"
        );
        Ok(index)
    }

    /// The persisted merged index, if it covers every requested document
    async fn load_merged(
        &self,
        context: &StorageContext,
        documents: &[Document],
    ) -> std::result::Result<VectorStoreIndex, IndexLoadError> {
        let index = self.attach(context.load_index_struct(FULLSTORE_INDEX_ID).await?);

        let (found, missing): (Vec<String>, Vec<String>) = documents
            .iter()
            .map(|d| d.id.to_string())
            .partition(|id| index.document_ids().contains(id));

        if missing.is_empty() {
            Ok(index)
        } else {
            Err(IndexLoadError::PartialMismatch { found, missing })
        }
    }

    /// Rebuild one document's index under its id lock. When `reuse_after` is
    /// set, an index persisted at or after that instant is returned as is.
    async fn rebuild_document(
        &self,
        context: &StorageContext,
        document: &Document,
        reuse_after: Option<DateTime<Utc>>,
    ) -> Result<VectorStoreIndex> {
        let index_id = document.id.to_string();
        let _guard = self.locks.lock(&index_id).await;

        if let Some(since) = reuse_after {
            if let Ok(existing) = context.load_index_struct(&index_id).await {
                if existing.created_at >= since {
                    info!(%index_id, "Index was rebuilt concurrently, reusing it");
                    return Ok(self.attach(existing));
                }
            }
        }

        let removed = context.vector_store().delete_index(&index_id).await?;
        let nodes = self.loader.load(document).await?;
        context.add_documents(&index_id, &nodes).await?;

        let index = VectorStoreIndex::from_nodes(
            &index_id,
            nodes,
            context.vector_store().clone(),
            self.embedder.clone(),
        )
        .await?;
        context.persist_index(index.index_struct()).await?;

        info!(
            %index_id,
            nodes = index.node_count(),
            removed_vectors = removed,
            "Index rebuilt and persisted"
        );
        Ok(index)
    }

    fn attach(&self, structure: crate::index::IndexStruct) -> VectorStoreIndex {
        VectorStoreIndex::from_struct(structure, self.vector_store.clone(), self.embedder.clone())
    }
}
