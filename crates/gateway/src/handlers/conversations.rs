//! Conversation handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::AppState;
use docchat_common::{
    errors::{AppError, Result},
    models::Conversation,
};

/// Create conversation request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateConversationRequest {
    /// Documents to discuss; may be empty
    #[serde(default)]
    #[validate(length(max = 50))]
    pub document_ids: Vec<Uuid>,
}

/// Start a conversation over the selected documents
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>)> {
    validate(&request)?;

    let conversation = state.repo.create_conversation(&request.document_ids).await?;

    tracing::info!(
        conversation_id = %conversation.id,
        documents = conversation.documents.len(),
        "Conversation created"
    );

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// Conversation with its documents and messages
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>> {
    state
        .repo
        .get_conversation(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.repo.delete_conversation(id).await? {
        tracing::info!(conversation_id = %id, "Conversation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::ConversationNotFound { id: id.to_string() })
    }
}
