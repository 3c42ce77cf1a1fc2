//! Chat turn runner
//!
//! Persists the user message and a pending assistant message, runs the
//! configured engine, forwards its events and records the outcome. A failed
//! turn leaves the assistant message with status `ERROR` and no content.

use crate::engine::ChatEngineFactory;
use crate::events::{EventSink, TurnEvent};
use async_trait::async_trait;
use chrono::Utc;
use docchat_common::config::ChatMode;
use docchat_common::db::Repository;
use docchat_common::errors::Result;
use docchat_common::metrics::record_chat_turn;
use docchat_common::models::{
    Conversation, Message, MessageRole, MessageStatus, MessageSubProcess,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Where a turn's messages and sub-processes are written
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn create_message(&self, message: &Message) -> Result<()>;

    async fn update_message(&self, id: Uuid, content: String, status: MessageStatus) -> Result<()>;

    async fn create_sub_process(&self, sub_process: &MessageSubProcess) -> Result<()>;
}

#[async_trait]
impl TurnStore for Repository {
    async fn create_message(&self, message: &Message) -> Result<()> {
        Repository::create_message(self, message).await
    }

    async fn update_message(&self, id: Uuid, content: String, status: MessageStatus) -> Result<()> {
        Repository::update_message(self, id, content, status).await
    }

    async fn create_sub_process(&self, sub_process: &MessageSubProcess) -> Result<()> {
        Repository::create_sub_process(self, sub_process).await
    }
}

pub struct ChatTurn {
    factory: Arc<ChatEngineFactory>,
    store: Arc<dyn TurnStore>,
    mode: ChatMode,
}

impl ChatTurn {
    pub fn new(factory: Arc<ChatEngineFactory>, store: Arc<dyn TurnStore>, mode: ChatMode) -> Self {
        Self {
            factory,
            store,
            mode,
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    /// Answer `user_content` in `conversation` and return the final
    /// assistant message.
    ///
    /// `conversation` holds the messages before this turn. Events go to
    /// `events` while it is open; a closed receiver does not stop the turn.
    /// Only storage failures are returned as errors.
    #[instrument(
        skip(self, conversation, user_content, events),
        fields(conversation_id = %conversation.id, mode = self.mode.as_str())
    )]
    pub async fn run(
        &self,
        conversation: Conversation,
        user_content: String,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<Message> {
        let timer = Instant::now();

        let user = Message::new(
            conversation.id,
            MessageRole::User,
            user_content.clone(),
            MessageStatus::Success,
        );
        self.store.create_message(&user).await?;

        let mut assistant = Message::new(
            conversation.id,
            MessageRole::Assistant,
            "",
            MessageStatus::Pending,
        );
        self.store.create_message(&assistant).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(assistant.id, tx);

        let answer = async move {
            let result = match self.factory.for_mode(self.mode, &conversation).await {
                Ok(engine) => engine.chat(&user_content, &sink).await,
                Err(e) => Err(e),
            };
            drop(sink);
            result
        };

        let mut sub_processes = Vec::new();
        let forward = async {
            while let Some(event) = rx.recv().await {
                if let TurnEvent::SubProcess(sub_process) = &event {
                    if let Err(e) = self.store.create_sub_process(sub_process).await {
                        warn!(error = %e, source = %sub_process.source, "Failed to persist sub-process");
                    }
                    sub_processes.push(sub_process.clone());
                }
                if events.send(event).await.is_err() {
                    debug!("Client gone, turn continues without streaming");
                }
            }
        };

        let (result, ()) = tokio::join!(answer, forward);

        let (content, status) = match result {
            Ok(content) => (content, MessageStatus::Success),
            Err(e) => {
                error!(error = %e, code = ?e.code(), "Chat turn failed");
                (String::new(), MessageStatus::Error)
            }
        };

        self.store
            .update_message(assistant.id, content.clone(), status)
            .await?;
        record_chat_turn(
            self.mode.as_str(),
            status == MessageStatus::Success,
            timer.elapsed().as_secs_f64(),
        );

        assistant.content = content;
        assistant.status = status;
        assistant.sub_processes = sub_processes;
        assistant.updated_at = Utc::now();

        info!(
            message_id = %assistant.id,
            status = %assistant.status,
            sub_processes = assistant.sub_processes.len(),
            "Chat turn finished"
        );
        let _ = events.send(TurnEvent::Completed(assistant.clone())).await;
        Ok(assistant)
    }
}
