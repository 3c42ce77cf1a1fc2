//! Chat message handler
//!
//! A posted message starts a chat turn in a background task and streams its
//! events back as Server-Sent Events. The turn is persisted even when the
//! client disconnects mid-stream.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use docchat_context::TurnEvent;
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use uuid::Uuid;
use validator::Validate;

use super::validate;
use crate::AppState;
use docchat_common::errors::{AppError, Result};

/// Buffered events per turn before the turn waits on the client
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 8000))]
    pub content: String,
}

fn to_sse(event: TurnEvent) -> Event {
    let name = event.name();
    Event::default()
        .event(name)
        .json_data(&event)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, event = name, "Failed to encode turn event");
            Event::default().event("error").data(e.to_string())
        })
}

/// Post a user message and stream the assistant's answer
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    validate(&request)?;
    if request.content.trim().is_empty() {
        return Err(AppError::Validation {
            message: "message content is blank".to_string(),
            field: Some("content".to_string()),
        });
    }

    let conversation = state
        .repo
        .get_conversation(id)
        .await?
        .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let turns = state.turns.clone();
    tokio::spawn(async move {
        if let Err(e) = turns.run(conversation, request.content, tx).await {
            tracing::error!(conversation_id = %id, error = %e, "Chat turn could not be stored");
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(to_sse(event)), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::models::{
        Message, MessageRole, MessageStatus, MessageSubProcess, SubProcessMetadata,
        SubProcessSource, SubProcessStatus,
    };

    #[test]
    fn test_every_event_kind_encodes() {
        let message = Message::new(
            Uuid::new_v4(),
            MessageRole::Assistant,
            "done",
            MessageStatus::Success,
        );
        let sub_process = MessageSubProcess::new(
            message.id,
            SubProcessSource::SubQuestion,
            SubProcessStatus::Finished,
            Some(SubProcessMetadata::with_function_output("ok")),
        );

        for event in [
            TurnEvent::Delta("Hel".into()),
            TurnEvent::SubProcess(sub_process),
            TurnEvent::Completed(message),
        ] {
            let _ = to_sse(event);
        }
    }

    #[test]
    fn test_blank_content_fails_validation() {
        let request = SendMessageRequest { content: String::new() };
        assert!(validate(&request).is_err());
    }
}
