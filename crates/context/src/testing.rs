//! Shared fixtures for engine and turn tests

use crate::engine::ChatEngineFactory;
use async_trait::async_trait;
use chrono::Utc;
use docchat_common::cache::TtlCache;
use docchat_common::config::RetrievalConfig;
use docchat_common::errors::Result;
use docchat_common::llm::{ChatResponse, Role, ScriptedLlm, ToolCall};
use docchat_common::models::{Conversation, Document};
use docchat_common::nodes::{DocumentLoader, NodeMetadata, TextNode};
use docchat_common::embeddings::HashingEmbedder;
use docchat_common::storage::LocalObjectStore;
use docchat_index::{IndexBuilder, InMemoryVectorStore};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Two pages of budget text per document
#[derive(Default)]
pub(crate) struct PagesLoader {
    calls: AtomicUsize,
}

impl PagesLoader {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentLoader for PagesLoader {
    async fn load(&self, document: &Document) -> Result<Vec<TextNode>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=2)
            .map(|page| {
                TextNode::new(
                    format!("{} budget page {} lists ferry and harbour costs", document.url, page),
                    NodeMetadata::for_document(document.id, Some(page.to_string())),
                )
            })
            .collect())
    }
}

pub(crate) fn factory(root: &Path, llm: ScriptedLlm) -> (ChatEngineFactory, Arc<PagesLoader>) {
    let loader = Arc::new(PagesLoader::default());
    let builder = IndexBuilder::new(
        Arc::new(LocalObjectStore::new(root)),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(HashingEmbedder::new(64)),
        loader.clone(),
        Arc::new(TtlCache::new("storage_context", 8, Duration::from_secs(300))),
        "bucket",
    );
    (
        ChatEngineFactory::new(Arc::new(builder), Arc::new(llm), RetrievalConfig::default()),
        loader,
    )
}

pub(crate) fn conversation(documents: Vec<Document>) -> Conversation {
    let now = Utc::now();
    Conversation {
        id: Uuid::new_v4(),
        messages: Vec::new(),
        documents,
        created_at: now,
        updated_at: now,
    }
}

/// Agent model that calls the planner once, decomposes into `plan` and
/// prefixes the tool output with `"Final: "`
pub(crate) fn scripted_agent_llm(plan: &'static str) -> ScriptedLlm {
    ScriptedLlm::new(move |req| {
        let last = req.messages.last();
        if !req.tools.is_empty() {
            return Ok(match last {
                Some(m) if m.role == Role::Tool => {
                    ChatResponse::text(format!("Final: {}", m.content))
                }
                _ => ChatResponse::tool_calls(vec![ToolCall {
                    id: "call_1".into(),
                    name: crate::planner::PLANNER_TOOL_NAME.into(),
                    arguments: serde_json::json!({
                        "input": last.map(|m| m.content.clone()).unwrap_or_default()
                    })
                    .to_string(),
                }]),
            });
        }
        let prompt = req.messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        if prompt.contains("sub_question") {
            return Ok(ChatResponse::text(plan));
        }
        if prompt.contains("Sub question:") {
            return Ok(ChatResponse::text("Both budgets grew."));
        }
        Ok(ChatResponse::text("Per-document answer."))
    })
}
