//! DocChat Common Library
//!
//! Shared code for all DocChat crates including:
//! - Conversation, document and citation schema
//! - Text node model and the document loader seam
//! - Error types and handling
//! - Configuration management
//! - TTL cache with an injectable clock
//! - Embedding and LLM client abstractions
//! - Object storage (S3 / local filesystem)
//! - Database models and repository
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod nodes;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::LlmClient;
pub use nodes::{DocumentLoader, NodeWithScore, TextNode};
pub use storage::ObjectStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metadata key carrying the owning document id on every indexed node
pub const DB_DOC_ID_KEY: &str = "db_document_id";

/// Metadata key carrying the page label of a node
pub const PAGE_LABEL_KEY: &str = "page_label";

/// Answer text used when retrieval or planning produced nothing to synthesize from
pub const EMPTY_RESPONSE: &str = "Empty Response";
