//! Repository pattern for database operations
//!
//! Maps between SeaORM rows and the `crate::models` schema.

use crate::db::entities::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{
    Conversation, Document, DocumentMetadataMap, Message, MessageStatus, MessageSubProcess,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Register a document by URL, returning the existing row if the URL is known
    pub async fn upsert_document(
        &self,
        url: String,
        metadata_map: Option<DocumentMetadataMap>,
    ) -> Result<Document> {
        if let Some(existing) = DocumentEntity::find()
            .filter(DocumentColumn::Url.eq(url.as_str()))
            .one(self.conn())
            .await?
        {
            return existing.into_document();
        }

        let now = chrono::Utc::now();
        let metadata = metadata_map.map(serde_json::to_value).transpose()?;

        let row = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            url: Set(url),
            metadata_map: Set(metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        row.insert(self.conn()).await?.into_document()
    }

    /// List all documents, newest first
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        DocumentEntity::find()
            .order_by_desc(DocumentColumn::CreatedAt)
            .all(self.conn())
            .await?
            .into_iter()
            .map(DocumentRow::into_document)
            .collect()
    }

    /// Fetch documents by id, preserving the order of `ids`
    pub async fn find_documents(&self, ids: &[Uuid]) -> Result<Vec<Document>> {
        let rows = DocumentEntity::find()
            .filter(DocumentColumn::Id.is_in(ids.iter().copied()))
            .all(self.conn())
            .await?;

        let mut by_id: HashMap<Uuid, DocumentRow> = rows.into_iter().map(|r| (r.id, r)).collect();

        ids.iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?
                    .into_document()
            })
            .collect()
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a conversation over the given documents
    pub async fn create_conversation(&self, document_ids: &[Uuid]) -> Result<Conversation> {
        let unique: Vec<Uuid> = {
            let mut seen = HashSet::new();
            document_ids
                .iter()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect()
        };
        let documents = self.find_documents(&unique).await?;

        let now = chrono::Utc::now();
        let conversation_id = Uuid::new_v4();
        let txn = self.conn().begin().await?;

        ConversationActiveModel {
            id: Set(conversation_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        for doc in &documents {
            ConversationDocumentActiveModel {
                id: Set(Uuid::new_v4()),
                conversation_id: Set(conversation_id),
                document_id: Set(doc.id),
                created_at: Set(now.into()),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        Ok(Conversation {
            id: conversation_id,
            messages: Vec::new(),
            documents,
            created_at: now,
            updated_at: now,
        })
    }

    /// Load a conversation with its documents and messages (oldest first)
    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let Some(row) = ConversationEntity::find_by_id(id).one(self.conn()).await? else {
            return Ok(None);
        };

        let links = ConversationDocumentEntity::find()
            .filter(ConversationDocumentColumn::ConversationId.eq(id))
            .order_by_asc(ConversationDocumentColumn::CreatedAt)
            .all(self.conn())
            .await?;
        let document_ids: Vec<Uuid> = links.iter().map(|l| l.document_id).collect();
        let documents = self.find_documents(&document_ids).await?;

        let message_rows = MessageEntity::find()
            .filter(MessageColumn::ConversationId.eq(id))
            .order_by_asc(MessageColumn::CreatedAt)
            .all(self.conn())
            .await?;

        let message_ids: Vec<Uuid> = message_rows.iter().map(|m| m.id).collect();
        let mut sub_processes: HashMap<Uuid, Vec<MessageSubProcess>> = HashMap::new();
        for sp in SubProcessEntity::find()
            .filter(SubProcessColumn::MessageId.is_in(message_ids))
            .order_by_asc(SubProcessColumn::CreatedAt)
            .all(self.conn())
            .await?
        {
            let sp = sp.into_sub_process()?;
            sub_processes.entry(sp.message_id).or_default().push(sp);
        }

        let messages = message_rows
            .into_iter()
            .map(|m| {
                let sps = sub_processes.remove(&m.id).unwrap_or_default();
                m.into_message(sps)
            })
            .collect::<Result<Vec<Message>>>()?;

        Ok(Some(Conversation {
            id,
            messages,
            documents,
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        }))
    }

    /// Delete a conversation and everything it owns
    pub async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        let result = ConversationEntity::delete_by_id(id)
            .exec(self.conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Insert a message (without sub-processes)
    pub async fn create_message(&self, message: &Message) -> Result<()> {
        MessageActiveModel {
            id: Set(message.id),
            conversation_id: Set(message.conversation_id),
            role: Set(message.role.as_str().to_string()),
            content: Set(message.content.clone()),
            status: Set(message.status.as_str().to_string()),
            created_at: Set(message.created_at.into()),
            updated_at: Set(message.updated_at.into()),
        }
        .insert(self.conn())
        .await?;

        ConversationEntity::update(ConversationActiveModel {
            id: Set(message.conversation_id),
            updated_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        })
        .exec(self.conn())
        .await?;

        Ok(())
    }

    /// Set the final content and status of a message
    pub async fn update_message(
        &self,
        id: Uuid,
        content: String,
        status: MessageStatus,
    ) -> Result<()> {
        MessageEntity::update(MessageActiveModel {
            id: Set(id),
            content: Set(content),
            status: Set(status.as_str().to_string()),
            updated_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        })
        .exec(self.conn())
        .await?;

        Ok(())
    }

    /// Append a sub-process record to a message
    pub async fn create_sub_process(&self, sub_process: &MessageSubProcess) -> Result<()> {
        let metadata = sub_process
            .metadata_map
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        SubProcessActiveModel {
            id: Set(sub_process.id),
            message_id: Set(sub_process.message_id),
            source: Set(sub_process.source.as_str().to_string()),
            status: Set(sub_process.status.as_str().to_string()),
            metadata_map: Set(metadata),
            created_at: Set(sub_process.created_at.into()),
        }
        .insert(self.conn())
        .await?;

        Ok(())
    }
}
