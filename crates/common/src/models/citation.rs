use crate::errors::CitationResolutionError;
use crate::nodes::NodeWithScore;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Question label used for the plain retrieval record of the simple chat mode
pub const RELEVANT_SNIPPETS_QUESTION: &str = "Relevant Document Snippets";

/// Reference from an answer back to a source passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: Uuid,
    pub text: String,
    pub page_number: i32,
    pub score: Option<f32>,
}

impl Citation {
    /// Resolve a scored passage into a citation.
    ///
    /// Requires the owning document id (a UUID) and an integer page label.
    pub fn from_node(node: &NodeWithScore) -> Result<Self, CitationResolutionError> {
        let metadata = &node.node.metadata;

        let raw_id = metadata
            .db_document_id
            .as_deref()
            .ok_or(CitationResolutionError::MissingDocumentId)?;
        let document_id =
            Uuid::parse_str(raw_id).map_err(|_| CitationResolutionError::InvalidDocumentId {
                value: raw_id.to_string(),
            })?;

        let label = metadata
            .page_label
            .as_deref()
            .ok_or(CitationResolutionError::MissingPageLabel)?;
        let page_number =
            label
                .trim()
                .parse::<i32>()
                .map_err(|_| CitationResolutionError::InvalidPageLabel {
                    value: label.to_string(),
                })?;

        Ok(Self {
            document_id,
            text: node.node.text.clone(),
            page_number,
            score: node.score,
        })
    }
}

/// A sub-question with its answer and supporting citations.
///
/// `citations` is `None` when retrieval found no passages at all, and
/// `Some` (possibly empty) when passages were found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswerPair {
    pub question: String,
    pub answer: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<Citation>>,
}

impl QuestionAnswerPair {
    /// Build a pair from a finished sub-question and the passages it used
    pub fn from_sub_question(
        question: impl Into<String>,
        answer: Option<String>,
        sources: &[NodeWithScore],
    ) -> Self {
        Self {
            question: question.into(),
            answer,
            citations: citations_for(sources),
        }
    }

    /// Record of a plain retrieval, with no generated answer
    pub fn from_retrieval(nodes: &[NodeWithScore]) -> Self {
        Self {
            question: RELEVANT_SNIPPETS_QUESTION.to_string(),
            answer: Some(String::new()),
            citations: citations_for(nodes),
        }
    }
}

fn citations_for(sources: &[NodeWithScore]) -> Option<Vec<Citation>> {
    if sources.is_empty() {
        return None;
    }

    let citations = sources
        .iter()
        .filter_map(|node| match Citation::from_node(node) {
            Ok(citation) => Some(citation),
            Err(e) => {
                warn!(node_id = %node.node.id, error = %e, "Excluding passage from citations");
                None
            }
        })
        .collect();

    Some(citations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeMetadata, TextNode};

    fn passage(doc_id: Option<&str>, page: Option<&str>, score: Option<f32>) -> NodeWithScore {
        NodeWithScore {
            node: TextNode::new(
                "Revenue grew 4% year over year.",
                NodeMetadata {
                    db_document_id: doc_id.map(str::to_string),
                    page_label: page.map(str::to_string),
                    ..Default::default()
                },
            ),
            score,
        }
    }

    #[test]
    fn test_citation_resolves_document_and_page() {
        let doc_id = Uuid::new_v4();
        let node = passage(Some(&doc_id.to_string()), Some("12"), Some(0.82));

        let citation = Citation::from_node(&node).unwrap();
        assert_eq!(citation.document_id, doc_id);
        assert_eq!(citation.page_number, 12);
        assert_eq!(citation.score, Some(0.82));
        assert_eq!(citation.text, "Revenue grew 4% year over year.");
    }

    #[test]
    fn test_citation_resolution_errors() {
        let doc_id = Uuid::new_v4().to_string();

        assert_eq!(
            Citation::from_node(&passage(None, Some("1"), None)),
            Err(CitationResolutionError::MissingDocumentId)
        );
        assert_eq!(
            Citation::from_node(&passage(Some(&doc_id), None, None)),
            Err(CitationResolutionError::MissingPageLabel)
        );
        assert_eq!(
            Citation::from_node(&passage(Some(&doc_id), Some("iv"), None)),
            Err(CitationResolutionError::InvalidPageLabel { value: "iv".into() })
        );
        assert!(matches!(
            Citation::from_node(&passage(Some("not-a-uuid"), Some("1"), None)),
            Err(CitationResolutionError::InvalidDocumentId { .. })
        ));
    }

    #[test]
    fn test_uncitable_passages_are_excluded_not_fatal() {
        let doc_id = Uuid::new_v4().to_string();
        let sources = vec![
            passage(Some(&doc_id), Some("3"), Some(0.9)),
            passage(Some(&doc_id), None, Some(0.8)),
            passage(None, Some("4"), Some(0.7)),
        ];

        let pair = QuestionAnswerPair::from_sub_question("q", Some("a".into()), &sources);
        let citations = pair.citations.unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].page_number, 3);
    }

    #[test]
    fn test_no_sources_means_no_citations() {
        let pair = QuestionAnswerPair::from_sub_question("q", Some("a".into()), &[]);
        assert!(pair.citations.is_none());

        let uncitable = vec![passage(None, None, None)];
        let pair = QuestionAnswerPair::from_sub_question("q", Some("a".into()), &uncitable);
        assert_eq!(pair.citations, Some(vec![]));
    }

    #[test]
    fn test_retrieval_record() {
        let doc_id = Uuid::new_v4().to_string();
        let pair = QuestionAnswerPair::from_retrieval(&[passage(Some(&doc_id), Some("1"), None)]);
        assert_eq!(pair.question, RELEVANT_SNIPPETS_QUESTION);
        assert_eq!(pair.answer.as_deref(), Some(""));
        assert_eq!(pair.citations.map(|c| c.len()), Some(1));
    }
}
