//! Text nodes: the unit of indexing and retrieval

use crate::errors::Result;
use crate::models::Document;
use crate::{DB_DOC_ID_KEY, PAGE_LABEL_KEY};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Id of the owning document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_document_id: Option<String>,

    /// 1-based page label for paged sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NodeMetadata {
    pub fn for_document(document_id: Uuid, page_label: Option<String>) -> Self {
        Self {
            db_document_id: Some(document_id.to_string()),
            page_label,
            extra: serde_json::Map::new(),
        }
    }

    /// String value of a metadata key, for exact-match filtering
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            DB_DOC_ID_KEY => self.db_document_id.as_deref(),
            PAGE_LABEL_KEY => self.page_label.as_deref(),
            other => self.extra.get(other).and_then(|v| v.as_str()),
        }
    }
}

/// A chunk of document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub id: String,
    /// Id of the source document the node was parsed from
    #[serde(default)]
    pub ref_doc_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl TextNode {
    pub fn new(text: impl Into<String>, metadata: NodeMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ref_doc_id: metadata.db_document_id.clone(),
            text: text.into(),
            metadata,
        }
    }
}

/// A retrieved node and its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithScore {
    pub node: TextNode,
    pub score: Option<f32>,
}

/// Turns a stored document into indexable nodes
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Fetch and parse a document. Every returned node carries the document id.
    async fn load(&self, document: &Document) -> Result<Vec<TextNode>>;
}
