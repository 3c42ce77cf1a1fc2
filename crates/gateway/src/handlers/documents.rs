//! Document registration handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use validator::Validate;

use super::validate;
use crate::AppState;
use docchat_common::{
    errors::{AppError, Result},
    models::{Document, DocumentMetadataMap},
};

/// Host paths are never accepted; local storage is reached through `s3://`
const SUPPORTED_SCHEMES: &[&str] = &["s3://", "http://", "https://"];

/// Request to register a document
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,

    #[serde(default)]
    pub metadata_map: Option<DocumentMetadataMap>,
}

/// Register a document; an existing URL returns the stored document
pub async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>)> {
    validate(&request)?;

    if !SUPPORTED_SCHEMES.iter().any(|s| request.url.starts_with(s)) {
        return Err(AppError::Validation {
            message: format!("unsupported document URL scheme: {}", request.url),
            field: Some("url".to_string()),
        });
    }

    let document = state
        .repo
        .upsert_document(request.url, request.metadata_map)
        .await?;

    tracing::info!(document_id = %document.id, url = %document.url, "Document registered");

    Ok((StatusCode::CREATED, Json(document)))
}

/// List registered documents, newest first
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<Document>>> {
    Ok(Json(state.repo.list_documents().await?))
}
