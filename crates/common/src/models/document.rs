use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-selectable source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// `s3://bucket/key` or `http(s)://...`
    pub url: String,
    #[serde(default)]
    pub metadata_map: Option<DocumentMetadataMap>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(url: impl Into<String>, metadata_map: Option<DocumentMetadataMap>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            metadata_map,
            created_at: now,
            updated_at: now,
        }
    }

    /// Typed event metadata, when present
    pub fn event_metadata(&self) -> Option<&EventDocumentMetadata> {
        self.metadata_map.as_ref()?.event_document.as_ref()
    }

    /// Lowercased file extension of the URL path, without the dot
    pub fn extension(&self) -> Option<String> {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

/// Document metadata: known keys are typed, anything else lands in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadataMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_document: Option<EventDocumentMetadata>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDocumentMetadata {
    pub filename: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub doc_type: DocType,
}

/// Kind of event document. Unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocType {
    Report,
    Minutes,
    Agenda,
    Brochure,
    Presentation,
    #[default]
    Unspecified,
    Other(String),
}

impl From<String> for DocType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "report" => DocType::Report,
            "minutes" => DocType::Minutes,
            "agenda" => DocType::Agenda,
            "brochure" => DocType::Brochure,
            "presentation" => DocType::Presentation,
            "" | "unspecified" => DocType::Unspecified,
            _ => DocType::Other(s),
        }
    }
}

impl From<DocType> for String {
    fn from(doc_type: DocType) -> Self {
        doc_type.to_string()
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocType::Report => f.write_str("report"),
            DocType::Minutes => f.write_str("minutes"),
            DocType::Agenda => f.write_str("agenda"),
            DocType::Brochure => f.write_str("brochure"),
            DocType::Presentation => f.write_str("presentation"),
            DocType::Unspecified => f.write_str("unspecified"),
            DocType::Other(other) => f.write_str(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_keeps_unknown_keys() {
        let raw = json!({
            "event_document": {
                "filename": "budget-2024.pdf",
                "department": "Finance",
                "doc_type": "report",
                "date_published": "2024-03-01T00:00:00Z"
            },
            "uploaded_by": "clerk"
        });

        let map: DocumentMetadataMap = serde_json::from_value(raw.clone()).unwrap();
        let event = map.event_document.as_ref().unwrap();
        assert_eq!(event.doc_type, DocType::Report);
        assert_eq!(event.department.as_deref(), Some("Finance"));
        assert_eq!(map.extra["uploaded_by"], "clerk");

        assert_eq!(serde_json::to_value(&map).unwrap()["uploaded_by"], "clerk");
    }

    #[test]
    fn test_unknown_doc_type_round_trips_verbatim() {
        let doc_type: DocType = serde_json::from_value(json!("Newsletter")).unwrap();
        assert_eq!(doc_type, DocType::Other("Newsletter".into()));
        assert_eq!(serde_json::to_value(&doc_type).unwrap(), json!("Newsletter"));
    }

    #[test]
    fn test_extension_ignores_query_string() {
        let doc = Document::new("https://cdn.example/files/Plan.PDF?X-Amz-Signature=abc", None);
        assert_eq!(doc.extension().as_deref(), Some("pdf"));

        let doc = Document::new("s3://bucket/no-extension", None);
        assert_eq!(doc.extension(), None);
    }
}
