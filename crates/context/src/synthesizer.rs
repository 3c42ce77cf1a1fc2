//! Response Synthesizer - combines sub-question answers into one reply
//!
//! Provides:
//! - A single LLM call over every question/answer pair, in planner order
//! - The selected document titles as extra context
//! - A fixed empty answer when there is nothing to synthesize from

use crate::prompts::synthesis_prompt;
use docchat_common::errors::Result;
use docchat_common::llm::{ChatMessage, ChatRequest, LlmClient};
use docchat_common::models::QuestionAnswerPair;
use docchat_common::EMPTY_RESPONSE;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct ResponseSynthesizer {
    llm: Arc<dyn LlmClient>,
    /// Titles of the conversation's documents
    document_titles: Vec<String>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, document_titles: Vec<String>) -> Self {
        Self {
            llm,
            document_titles,
        }
    }

    /// Answer `query` from `pairs`.
    ///
    /// Citations are not merged across pairs; the same passage may back
    /// several answers.
    #[instrument(skip(self, query, pairs), fields(pairs = pairs.len()))]
    pub async fn synthesize(&self, query: &str, pairs: &[QuestionAnswerPair]) -> Result<String> {
        if pairs.is_empty() {
            debug!("No answered sub-questions, returning empty response");
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let prompt = synthesis_prompt(&self.document_titles, pairs, query);
        let response = self
            .llm
            .chat(ChatRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(0.0))
            .await?;

        Ok(response.content.unwrap_or_default())
    }
}
