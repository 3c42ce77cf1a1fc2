//! Chat engines and their factory
//!
//! [`ChatEngineFactory::get_chat_engine`] builds the full agent over
//! per-document indices; [`ChatEngineFactory::get_chat_engine_simplest`]
//! builds a streaming context chat over the merged index.

use crate::agent::FunctionCallingAgent;
use crate::events::EventSink;
use crate::history::build_prefix_messages;
use crate::planner::SubQuestionPlanner;
use crate::prompts::context_block;
use crate::synthesizer::ResponseSynthesizer;
use crate::tools::{document_tools, unique_titles};
use async_trait::async_trait;
use chrono::Utc;
use docchat_common::config::{ChatMode, RetrievalConfig};
use docchat_common::errors::Result;
use docchat_common::llm::{ChatMessage, ChatRequest, LlmClient};
use docchat_common::models::{
    Conversation, QuestionAnswerPair, SubProcessMetadata, SubProcessSource,
};
use docchat_index::query_engine::format_context;
use docchat_index::{index_to_query_engine_single, IndexBuilder, QueryEngine, RetrieverQueryEngine};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Answers one user message within a conversation
#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Produce the answer, reporting fragments and sub-processes to `sink`
    async fn chat(&self, message: &str, sink: &EventSink) -> Result<String>;
}

/// Context chat over the merged index.
///
/// Retrieves passages for the message, adds them to the system prompt and
/// streams the model's answer.
pub struct ContextChatEngine {
    llm: Arc<dyn LlmClient>,
    prefix_messages: Vec<ChatMessage>,
    /// `None` when the conversation has no documents
    retriever: Option<RetrieverQueryEngine>,
}

impl ContextChatEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prefix_messages: Vec<ChatMessage>,
        retriever: Option<RetrieverQueryEngine>,
    ) -> Self {
        Self {
            llm,
            prefix_messages,
            retriever,
        }
    }
}

#[async_trait]
impl ChatEngine for ContextChatEngine {
    #[instrument(skip(self, message, sink), fields(message_id = %sink.message_id()))]
    async fn chat(&self, message: &str, sink: &EventSink) -> Result<String> {
        let mut messages = self.prefix_messages.clone();

        if let Some(retriever) = &self.retriever {
            let nodes = retriever.retrieve(message).await?;
            sink.sub_process(
                SubProcessSource::Retrieve,
                SubProcessMetadata::with_sub_question(QuestionAnswerPair::from_retrieval(&nodes)),
            );
            if !nodes.is_empty() {
                if let Some(system) = messages.first_mut() {
                    system.content =
                        format!("{}\n\n{}", system.content, context_block(&format_context(&nodes)));
                }
            }
        }
        messages.push(ChatMessage::user(message));

        let mut stream = self
            .llm
            .stream_chat(ChatRequest::new(messages).with_temperature(0.0))
            .await?;

        let mut answer = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            answer.push_str(&fragment);
            sink.delta(fragment);
        }
        Ok(answer)
    }
}

pub struct ChatEngineFactory {
    builder: Arc<IndexBuilder>,
    llm: Arc<dyn LlmClient>,
    retrieval: RetrievalConfig,
}

impl ChatEngineFactory {
    pub fn new(builder: Arc<IndexBuilder>, llm: Arc<dyn LlmClient>, retrieval: RetrievalConfig) -> Self {
        Self {
            builder,
            llm,
            retrieval,
        }
    }

    /// Agent with the sub-question planner over one tool per document
    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id))]
    pub async fn get_chat_engine(&self, conversation: &Conversation) -> Result<FunctionCallingAgent> {
        let documents = &conversation.documents;
        let prefix = build_prefix_messages(&conversation.messages, documents, Utc::now().date_naive());

        if documents.is_empty() {
            info!("No documents selected, planner tool not registered");
            return Ok(FunctionCallingAgent::new(
                self.llm.clone(),
                prefix,
                None,
                self.retrieval.max_function_calls,
            ));
        }

        let indices = self.builder.build_doc_id_to_index_map(documents).await?;
        let tools = document_tools(
            documents,
            &indices,
            self.retrieval.multi_doc_top_k,
            self.llm.clone(),
        );
        let planner = SubQuestionPlanner::new(
            tools,
            self.llm.clone(),
            ResponseSynthesizer::new(self.llm.clone(), unique_titles(documents)),
        );

        Ok(FunctionCallingAgent::new(
            self.llm.clone(),
            prefix,
            Some(planner),
            self.retrieval.max_function_calls,
        ))
    }

    /// Streaming context chat over the merged index
    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id))]
    pub async fn get_chat_engine_simplest(&self, conversation: &Conversation) -> Result<ContextChatEngine> {
        let documents = &conversation.documents;
        let prefix = build_prefix_messages(&conversation.messages, documents, Utc::now().date_naive());

        let retriever = if documents.is_empty() {
            None
        } else {
            let index = self.builder.build_single_index(documents, false).await?;
            Some(index_to_query_engine_single(
                index,
                self.retrieval.single_index_top_k,
                self.llm.clone(),
            ))
        };

        Ok(ContextChatEngine::new(self.llm.clone(), prefix, retriever))
    }

    pub async fn for_mode(&self, mode: ChatMode, conversation: &Conversation) -> Result<Box<dyn ChatEngine>> {
        Ok(match mode {
            ChatMode::Full => Box::new(self.get_chat_engine(conversation).await?),
            ChatMode::Simple => Box::new(self.get_chat_engine_simplest(conversation).await?),
        })
    }
}
