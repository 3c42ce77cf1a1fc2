//! Query engines over a vector index
//!
//! A query engine retrieves the top-k nodes for a question and answers it
//! from those nodes with one LLM call. Per-document engines only see nodes
//! whose `db_document_id` equals their document.

use crate::index::VectorStoreIndex;
use crate::vector_store::MetadataFilter;
use async_trait::async_trait;
use docchat_common::errors::Result;
use docchat_common::llm::LlmClient;
use docchat_common::nodes::NodeWithScore;
use docchat_common::{DB_DOC_ID_KEY, EMPTY_RESPONSE, PAGE_LABEL_KEY};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Answer plus the passages it was drawn from
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<NodeWithScore>,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Top-k passages for `query`, best first
    async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>>;

    /// Answer `query` from the retrieved passages
    async fn query(&self, query: &str) -> Result<QueryResponse>;
}

pub struct RetrieverQueryEngine {
    index: VectorStoreIndex,
    filters: Vec<MetadataFilter>,
    top_k: usize,
    llm: Arc<dyn LlmClient>,
}

impl RetrieverQueryEngine {
    pub fn new(
        index: VectorStoreIndex,
        filters: Vec<MetadataFilter>,
        top_k: usize,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            index,
            filters,
            top_k,
            llm,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn filters(&self) -> &[MetadataFilter] {
        &self.filters
    }
}

/// Engine restricted to one document's nodes
pub fn index_to_query_engine(
    document_id: &str,
    index: VectorStoreIndex,
    top_k: usize,
    llm: Arc<dyn LlmClient>,
) -> RetrieverQueryEngine {
    RetrieverQueryEngine::new(
        index,
        vec![MetadataFilter::exact(DB_DOC_ID_KEY, document_id)],
        top_k,
        llm,
    )
}

/// Engine over every node of a merged index
pub fn index_to_query_engine_single(
    index: VectorStoreIndex,
    top_k: usize,
    llm: Arc<dyn LlmClient>,
) -> RetrieverQueryEngine {
    RetrieverQueryEngine::new(index, Vec::new(), top_k, llm)
}

/// Render passages the way they are shown to the model
pub fn format_context(nodes: &[NodeWithScore]) -> String {
    let mut context = String::new();
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            context.push_str("\n\n");
        }
        if let Some(page) = &node.node.metadata.page_label {
            let _ = writeln!(context, "{}: {}", PAGE_LABEL_KEY, page);
        }
        context.push_str(&node.node.text);
    }
    context
}

fn qa_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: "
    )
}

#[async_trait]
impl QueryEngine for RetrieverQueryEngine {
    async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        self.index.retrieve(query, self.top_k, &self.filters).await
    }

    #[instrument(skip(self, query), fields(index_id = %self.index.index_id(), top_k = self.top_k))]
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let source_nodes = self.retrieve(query).await?;
        if source_nodes.is_empty() {
            debug!("No passages retrieved");
            return Ok(QueryResponse {
                response: EMPTY_RESPONSE.to_string(),
                source_nodes,
            });
        }

        let prompt = qa_prompt(&format_context(&source_nodes), query);
        let response = self.llm.complete(&prompt).await?;

        Ok(QueryResponse {
            response,
            source_nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{InMemoryVectorStore, VectorStore};
    use docchat_common::embeddings::{Embedder, HashingEmbedder};
    use docchat_common::llm::ScriptedLlm;
    use docchat_common::nodes::{NodeMetadata, TextNode};
    use uuid::Uuid;

    async fn shared_index(docs: &[Uuid]) -> VectorStoreIndex {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let nodes = docs
            .iter()
            .flat_map(|doc| {
                (1..=4).map(move |page| {
                    TextNode::new(
                        format!("ferry timetable update number {}", page),
                        NodeMetadata::for_document(*doc, Some(page.to_string())),
                    )
                })
            })
            .collect();
        VectorStoreIndex::from_nodes("shared", nodes, store, embedder)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_document_filter_and_top_k() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let index = shared_index(&[a, b]).await;
        let engine = index_to_query_engine(&a.to_string(), index, 3, Arc::new(ScriptedLlm::echo()));

        let nodes = engine.retrieve("ferry timetable").await.unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes
            .iter()
            .all(|n| n.node.metadata.db_document_id == Some(a.to_string())));
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let doc = Uuid::new_v4();
        let engine = index_to_query_engine_single(
            shared_index(&[doc]).await,
            5,
            Arc::new(ScriptedLlm::echo()),
        );

        let first = engine.retrieve("timetable update").await.unwrap();
        let second = engine.retrieve("timetable update").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[tokio::test]
    async fn test_query_prompts_with_context() {
        let doc = Uuid::new_v4();
        let llm = ScriptedLlm::fixed("The ferry leaves at 9.");
        let engine = index_to_query_engine(&doc.to_string(), shared_index(&[doc]).await, 2, Arc::new(llm.clone()));

        let response = engine.query("When does the ferry leave?").await.unwrap();
        assert_eq!(response.response, "The ferry leaves at 9.");
        assert_eq!(response.source_nodes.len(), 2);

        let calls = llm.calls();
        let prompt = &calls[0].messages[0].content;
        assert!(prompt.contains("page_label: "));
        assert!(prompt.contains("Query: When does the ferry leave?"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_llm() {
        let index = shared_index(&[Uuid::new_v4()]).await;
        let llm = ScriptedLlm::fixed("unused");
        let engine = index_to_query_engine(&Uuid::new_v4().to_string(), index, 3, Arc::new(llm.clone()));

        let response = engine.query("anything").await.unwrap();
        assert_eq!(response.response, EMPTY_RESPONSE);
        assert!(response.source_nodes.is_empty());
        assert_eq!(llm.call_count(), 0);
    }
}
