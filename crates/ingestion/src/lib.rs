//! DocChat Ingestion
//!
//! Turns a stored [`Document`](docchat_common::models::Document) into text
//! nodes ready for embedding:
//! 1. Sign the bucket URL
//! 2. Stream the bytes into a scoped scratch directory
//! 3. Parse pages (PDF or plain text)
//! 4. Split pages into overlapping chunks tagged with the owning document id

pub mod chunker;
pub mod fetcher;
pub mod parser;

pub use chunker::ChunkingConfig;
pub use fetcher::DocumentFetcher;
pub use parser::Page;
