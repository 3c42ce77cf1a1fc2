//! Per-document query engine tools
//!
//! Each selected document becomes a named, described tool the planner can
//! route sub-questions to.

use docchat_common::llm::LlmClient;
use docchat_common::models::Document;
use docchat_index::{index_to_query_engine, QueryEngine, VectorStoreIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

const GENERIC_DESCRIPTION: &str =
    "A document containing useful information that the user pre-selected to discuss with the assistant.";

const UNTITLED: &str = "Untitled document";

/// A query engine with the name and description shown to the model
#[derive(Clone)]
pub struct QueryEngineTool {
    pub name: String,
    pub description: String,
    pub engine: Arc<dyn QueryEngine>,
}

impl std::fmt::Debug for QueryEngineTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngineTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Display title: event filename, else the URL's file name
pub fn build_title_for_document(document: &Document) -> String {
    if let Some(event) = document.event_metadata() {
        if !event.filename.trim().is_empty() {
            return event.filename.clone();
        }
    }

    document
        .url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNTITLED.to_string())
}

pub fn build_description_for_document(document: &Document) -> String {
    let Some(event) = document.event_metadata() else {
        return GENERIC_DESCRIPTION.to_string();
    };

    let department = event.department.as_deref().unwrap_or("an unknown department");
    let published = event
        .date_published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "an unknown date".to_string());

    format!(
        "An event {} document ({}) published by {}, on {}.",
        event.doc_type, event.filename, department, published
    )
}

/// Titles for `documents` in order; repeated titles get a ` (n)` suffix
pub fn unique_titles(documents: &[Document]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    documents
        .iter()
        .map(|doc| {
            let base = build_title_for_document(doc);
            let mut title = base.clone();
            let mut n = 2;
            while !seen.insert(title.clone()) {
                title = format!("{} ({})", base, n);
                n += 1;
            }
            title
        })
        .collect()
}

/// One tool per document that has an index, in document order
pub fn document_tools(
    documents: &[Document],
    indices: &HashMap<String, VectorStoreIndex>,
    top_k: usize,
    llm: Arc<dyn LlmClient>,
) -> Vec<QueryEngineTool> {
    documents
        .iter()
        .zip(unique_titles(documents))
        .filter_map(|(doc, name)| {
            let doc_id = doc.id.to_string();
            let Some(index) = indices.get(&doc_id) else {
                warn!(document_id = %doc_id, "No index for document, skipping its tool");
                return None;
            };
            Some(QueryEngineTool {
                name,
                description: build_description_for_document(doc),
                engine: Arc::new(index_to_query_engine(
                    &doc_id,
                    index.clone(),
                    top_k,
                    llm.clone(),
                )),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docchat_common::models::{DocType, DocumentMetadataMap, EventDocumentMetadata};

    fn event_doc(filename: &str, department: Option<&str>) -> Document {
        Document::new(
            format!("s3://docs/{}", filename),
            Some(DocumentMetadataMap {
                event_document: Some(EventDocumentMetadata {
                    filename: filename.to_string(),
                    department: department.map(str::to_string),
                    location: None,
                    date_published: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
                    event_date: None,
                    doc_type: DocType::Minutes,
                }),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_description_from_event_metadata() {
        let doc = event_doc("council-0301.pdf", Some("Planning"));
        assert_eq!(
            build_description_for_document(&doc),
            "An event minutes document (council-0301.pdf) published by Planning, on 2024-03-01."
        );
    }

    #[test]
    fn test_generic_description_and_url_title() {
        let doc = Document::new("https://cdn.example/files/plan.pdf?sig=abc", None);
        assert_eq!(build_description_for_document(&doc), GENERIC_DESCRIPTION);
        assert_eq!(build_title_for_document(&doc), "plan.pdf");

        let doc = Document::new("https://cdn.example/", None);
        assert_eq!(build_title_for_document(&doc), UNTITLED);
    }

    #[test]
    fn test_duplicate_titles_are_disambiguated() {
        let docs = vec![
            event_doc("agenda.pdf", None),
            event_doc("agenda.pdf", None),
            event_doc("budget.pdf", None),
            event_doc("agenda.pdf", None),
        ];
        assert_eq!(
            unique_titles(&docs),
            vec!["agenda.pdf", "agenda.pdf (2)", "budget.pdf", "agenda.pdf (3)"]
        );
    }
}
