//! Persisted storage context
//!
//! A storage context ties together the object store holding the docstore and
//! index store files, and the vector store holding embeddings. Two layouts
//! share one persist directory:
//!
//! | layout        | context manifest                  | index store              | docstore                 | vectors (memory store)   |
//! |---------------|-----------------------------------|--------------------------|--------------------------|--------------------------|
//! | per-document  | `storage_context.json`            | `index_store/<id>.json`  | `docstore/<id>.json`     | `vector_store.json`      |
//! | merged        | `fullstore_storage_context.json`  | `fullstoreindex.json`    | `fullstoredocs.json`     | `fullstorevectors.json`  |

use crate::index::IndexStruct;
use crate::vector_store::VectorStore;
use chrono::{DateTime, Utc};
use docchat_common::errors::{AppError, IndexLoadError, Result};
use docchat_common::nodes::TextNode;
use docchat_common::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Fixed id of the merged index
pub const FULLSTORE_INDEX_ID: &str = "fullstore";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistLayout {
    /// One index per document, keyed by document id
    PerDocument,
    /// One merged index under [`FULLSTORE_INDEX_ID`]
    Fullstore,
}

impl PersistLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerDocument => "per_document",
            Self::Fullstore => "fullstore",
        }
    }

    /// Key of this layout's context in the storage context cache
    pub fn cache_key(&self) -> &'static str {
        match self {
            Self::PerDocument => "global_storage_context",
            Self::Fullstore => "fullstore_storage_context",
        }
    }

    /// Whether an index id belongs to this layout
    pub fn owns(&self, index_id: &str) -> bool {
        match self {
            Self::PerDocument => index_id != FULLSTORE_INDEX_ID,
            Self::Fullstore => index_id == FULLSTORE_INDEX_ID,
        }
    }

    fn manifest_path(&self, persist_dir: &str) -> String {
        match self {
            Self::PerDocument => format!("{}/storage_context.json", persist_dir),
            Self::Fullstore => format!("{}/fullstore_storage_context.json", persist_dir),
        }
    }

    fn index_path(&self, persist_dir: &str, index_id: &str) -> String {
        match self {
            Self::PerDocument => format!("{}/index_store/{}.json", persist_dir, index_id),
            Self::Fullstore => format!("{}/fullstoreindex.json", persist_dir),
        }
    }

    fn docstore_path(&self, persist_dir: &str, index_id: &str) -> String {
        match self {
            Self::PerDocument => format!("{}/docstore/{}.json", persist_dir, index_id),
            Self::Fullstore => format!("{}/fullstoredocs.json", persist_dir),
        }
    }

    fn vectors_path(&self, persist_dir: &str) -> String {
        match self {
            Self::PerDocument => format!("{}/vector_store.json", persist_dir),
            Self::Fullstore => format!("{}/fullstorevectors.json", persist_dir),
        }
    }
}

impl fmt::Display for PersistLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level file of a persisted context
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    index_ids: BTreeSet<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Manifest {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            version: MANIFEST_VERSION,
            index_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Nodes added to the docstore for one index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocstoreFile {
    index_id: String,
    nodes: Vec<TextNode>,
}

pub struct StorageContext {
    persist_dir: String,
    layout: PersistLayout,
    objects: Arc<dyn ObjectStore>,
    vector_store: Arc<dyn VectorStore>,
    manifest: Mutex<Manifest>,
}

impl StorageContext {
    /// Load a persisted context. `NotFound` when the manifest is absent.
    pub async fn load(
        persist_dir: &str,
        layout: PersistLayout,
        objects: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
    ) -> std::result::Result<Self, IndexLoadError> {
        let path = layout.manifest_path(persist_dir);
        let corrupt = |message: String| IndexLoadError::Corrupt {
            index_id: path.clone(),
            message,
        };

        let bytes = objects
            .read(&path)
            .await
            .map_err(|e| corrupt(e.to_string()))?
            .ok_or_else(|| IndexLoadError::NotFound {
                what: format!("storage context {}", path),
            })?;

        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(corrupt(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }

        vector_store
            .restore(objects.as_ref(), &layout.vectors_path(persist_dir))
            .await
            .map_err(|e| corrupt(e.to_string()))?;

        info!(
            persist_dir,
            layout = %layout,
            indices = manifest.index_ids.len(),
            "Loaded storage context"
        );

        Ok(Self {
            persist_dir: persist_dir.to_string(),
            layout,
            objects,
            vector_store,
            manifest: Mutex::new(manifest),
        })
    }

    /// Create an empty context and persist it right away
    pub async fn create(
        persist_dir: &str,
        layout: PersistLayout,
        objects: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let context = Self {
            persist_dir: persist_dir.to_string(),
            layout,
            objects,
            vector_store,
            manifest: Mutex::new(Manifest::new()),
        };
        context.persist().await?;

        info!(persist_dir, layout = %layout, "Created new storage context");
        Ok(context)
    }

    /// Load the persisted context, creating it on `NotFound`.
    /// Corrupt manifests are reported rather than overwritten.
    pub async fn load_or_create(
        persist_dir: &str,
        layout: PersistLayout,
        objects: Arc<dyn ObjectStore>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        match Self::load(persist_dir, layout, objects.clone(), vector_store.clone()).await {
            Ok(context) => Ok(context),
            Err(IndexLoadError::NotFound { .. }) => {
                info!(persist_dir, "Could not find storage context, creating a new one");
                Self::create(persist_dir, layout, objects, vector_store).await
            }
            Err(e) => Err(AppError::IndexLoad(e)),
        }
    }

    pub fn layout(&self) -> PersistLayout {
        self.layout
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Ids of indices recorded in the manifest
    pub async fn index_ids(&self) -> BTreeSet<String> {
        self.manifest.lock().await.index_ids.clone()
    }

    /// Read the index store entry for `index_id` and check its vectors are present
    pub async fn load_index_struct(
        &self,
        index_id: &str,
    ) -> std::result::Result<IndexStruct, IndexLoadError> {
        let path = self.layout.index_path(&self.persist_dir, index_id);
        let corrupt = |message: String| IndexLoadError::Corrupt {
            index_id: index_id.to_string(),
            message,
        };

        let bytes = self
            .objects
            .read(&path)
            .await
            .map_err(|e| corrupt(e.to_string()))?
            .ok_or_else(|| IndexLoadError::NotFound {
                what: format!("index {}", index_id),
            })?;

        let index_struct: IndexStruct =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if index_struct.index_id != index_id {
            return Err(corrupt(format!(
                "index store entry belongs to {}",
                index_struct.index_id
            )));
        }

        let stored = self
            .vector_store
            .count(index_id)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        if stored < index_struct.node_ids.len() as u64 {
            return Err(corrupt(format!(
                "{} of {} vectors present",
                stored,
                index_struct.node_ids.len()
            )));
        }

        debug!(index_id, nodes = index_struct.node_ids.len(), "Loaded index struct");
        Ok(index_struct)
    }

    /// Load several index structs. Some found and some missing is a
    /// `PartialMismatch`; nothing found is `NotFound`.
    pub async fn load_index_structs(
        &self,
        index_ids: &[String],
    ) -> std::result::Result<Vec<IndexStruct>, IndexLoadError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        let mut loaded = Vec::with_capacity(index_ids.len());

        for id in index_ids {
            match self.load_index_struct(id).await {
                Ok(s) => {
                    found.push(id.clone());
                    loaded.push(s);
                }
                Err(IndexLoadError::NotFound { .. }) => missing.push(id.clone()),
                Err(e) => return Err(e),
            }
        }

        match (found.is_empty(), missing.is_empty()) {
            (_, true) => Ok(loaded),
            (true, false) => Err(IndexLoadError::NotFound {
                what: format!("indices {}", missing.join(", ")),
            }),
            (false, false) => Err(IndexLoadError::PartialMismatch { found, missing }),
        }
    }

    /// Record the nodes of an index in the docstore
    pub async fn add_documents(&self, index_id: &str, nodes: &[TextNode]) -> Result<()> {
        let file = DocstoreFile {
            index_id: index_id.to_string(),
            nodes: nodes.to_vec(),
        };
        self.objects
            .write(
                &self.layout.docstore_path(&self.persist_dir, index_id),
                serde_json::to_vec(&file)?,
            )
            .await
    }

    /// Persist an index struct, the vectors and the manifest
    pub async fn persist_index(&self, index_struct: &IndexStruct) -> Result<()> {
        self.objects
            .write(
                &self
                    .layout
                    .index_path(&self.persist_dir, &index_struct.index_id),
                serde_json::to_vec(index_struct)?,
            )
            .await?;

        self.manifest
            .lock()
            .await
            .index_ids
            .insert(index_struct.index_id.clone());

        self.persist().await
    }

    /// Write the manifest and, for stores that need it, the vectors
    pub async fn persist(&self) -> Result<()> {
        let bytes = {
            let mut manifest = self.manifest.lock().await;
            manifest.updated_at = Utc::now();
            serde_json::to_vec(&*manifest)?
        };

        self.vector_store
            .persist(
                self.objects.as_ref(),
                &self.layout.vectors_path(&self.persist_dir),
                self.layout,
            )
            .await?;

        self.objects
            .write(&self.layout.manifest_path(&self.persist_dir), bytes)
            .await
    }
}
