use super::{text_enum, Document, QuestionAnswerPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    pub enum MessageRole {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
}

text_enum! {
    /// Delivery status; only `Success` messages feed later turns
    pub enum MessageStatus {
        Pending => "PENDING",
        Success => "SUCCESS",
        Error => "ERROR",
    }
}

text_enum! {
    /// Pipeline stage that produced a sub-process record
    pub enum SubProcessSource {
        Chunking => "CHUNKING",
        NodeParsing => "NODE_PARSING",
        Embedding => "EMBEDDING",
        Llm => "LLM",
        Query => "QUERY",
        Retrieve => "RETRIEVE",
        Synthesize => "SYNTHESIZE",
        Tree => "TREE",
        SubQuestion => "SUB_QUESTION",
        Templating => "TEMPLATING",
        FunctionCall => "FUNCTION_CALL",
        Reranking => "RERANKING",
        Exception => "EXCEPTION",
        AgentStep => "AGENT_STEP",
        ConstructedQueryEngine => "CONSTRUCTED_QUERY_ENGINE",
    }
}

text_enum! {
    pub enum SubProcessStatus {
        Pending => "PENDING",
        Finished => "FINISHED",
    }
}

/// A chat session over a fixed set of documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Ordered by creation time
    pub messages: Vec<Message>,
    pub documents: Vec<Document>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub sub_processes: Vec<MessageSubProcess>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: Uuid,
        role: MessageRole,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            status,
            sub_processes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Intermediate record of how an answer was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSubProcess {
    pub id: Uuid,
    pub message_id: Uuid,
    pub source: SubProcessSource,
    pub status: SubProcessStatus,
    #[serde(default)]
    pub metadata_map: Option<SubProcessMetadata>,
    pub created_at: DateTime<Utc>,
}

impl MessageSubProcess {
    pub fn new(
        message_id: Uuid,
        source: SubProcessSource,
        status: SubProcessStatus,
        metadata_map: Option<SubProcessMetadata>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            source,
            status,
            metadata_map,
            created_at: Utc::now(),
        }
    }
}

/// Sub-process payload. `extra` holds keys this version does not model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubProcessMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_question: Option<QuestionAnswerPair>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_output: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SubProcessMetadata {
    pub fn with_sub_question(pair: QuestionAnswerPair) -> Self {
        Self {
            sub_question: Some(pair),
            ..Default::default()
        }
    }

    pub fn with_function_output(output: impl Into<String>) -> Self {
        Self {
            function_output: Some(output.into()),
            ..Default::default()
        }
    }
}
