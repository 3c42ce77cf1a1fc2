//! Document entity

use crate::errors::Result as AppResult;
use crate::models::{Document, DocumentMetadataMap};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub url: String,

    /// Document metadata as JSONB
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata_map: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn into_document(self) -> AppResult<Document> {
        let metadata_map = self
            .metadata_map
            .map(serde_json::from_value::<DocumentMetadataMap>)
            .transpose()?;

        Ok(Document {
            id: self.id,
            url: self.url,
            metadata_map,
            created_at: self.created_at.into(),
            updated_at: self.updated_at.into(),
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_document::Entity")]
    ConversationDocument,
}

impl Related<super::conversation_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversationDocument.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
