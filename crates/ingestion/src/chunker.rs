//! Text chunking module
//!
//! Splits pages into overlapping chunks and turns each chunk into a node
//! tagged with the owning document id and page label.

use crate::parser::Page;
use docchat_common::config::RetrievalConfig;
use docchat_common::nodes::{NodeMetadata, TextNode};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl From<&RetrievalConfig> for ChunkingConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

fn splitter(config: &ChunkingConfig) -> TextSplitter<text_splitter::Characters> {
    let size = config.chunk_size.max(1);
    let chunk_config = ChunkConfig::new(size)
        .with_overlap(config.chunk_overlap)
        .unwrap_or_else(|e| {
            warn!(
                chunk_size = size,
                chunk_overlap = config.chunk_overlap,
                error = %e,
                "Invalid chunk overlap, chunking without overlap"
            );
            ChunkConfig::new(size)
        });
    TextSplitter::new(chunk_config)
}

/// Split every page into nodes owned by `document_id`
pub fn chunk_pages(document_id: Uuid, pages: &[Page], config: &ChunkingConfig) -> Vec<TextNode> {
    let splitter = splitter(config);

    let nodes: Vec<TextNode> = pages
        .iter()
        .flat_map(|page| {
            splitter.chunks(&page.text).map(move |chunk| {
                TextNode::new(
                    chunk,
                    NodeMetadata::for_document(document_id, Some(page.label.clone())),
                )
            })
        })
        .collect();

    debug!(
        %document_id,
        pages = pages.len(),
        nodes = nodes.len(),
        chunk_size = config.chunk_size,
        "Pages chunked"
    );

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(label: &str, text: &str) -> Page {
        Page {
            label: label.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_every_node_carries_document_and_page() {
        let doc_id = Uuid::new_v4();
        let config = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 50,
        };
        let pages = vec![
            page("1", &"This is a test. ".repeat(40)),
            page("2", "Short second page."),
        ];

        let nodes = chunk_pages(doc_id, &pages, &config);
        assert!(nodes.len() > 2);

        let doc_id = doc_id.to_string();
        for node in &nodes {
            assert!(node.text.chars().count() <= config.chunk_size);
            assert_eq!(node.metadata.db_document_id.as_deref(), Some(doc_id.as_str()));
            assert_eq!(node.ref_doc_id.as_deref(), Some(doc_id.as_str()));
        }
        assert_eq!(nodes.last().unwrap().metadata.page_label.as_deref(), Some("2"));
    }

    #[test]
    fn test_oversized_overlap_falls_back() {
        let config = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 50,
        };
        let nodes = chunk_pages(Uuid::new_v4(), &[page("1", "alpha beta gamma delta")], &config);
        assert!(!nodes.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let nodes = chunk_pages(Uuid::new_v4(), &[], &ChunkingConfig::default());
        assert!(nodes.is_empty());
    }
}
