//! Message sub-process entity

use crate::errors::Result as AppResult;
use crate::models::{MessageSubProcess, SubProcessMetadata};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message_sub_processes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub message_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata_map: Option<Json>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn into_sub_process(self) -> AppResult<MessageSubProcess> {
        let metadata_map = self
            .metadata_map
            .map(serde_json::from_value::<SubProcessMetadata>)
            .transpose()?;

        Ok(MessageSubProcess {
            id: self.id,
            message_id: self.message_id,
            source: self.source.parse()?,
            status: self.status.parse()?,
            metadata_map,
            created_at: self.created_at.into(),
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::message::Entity",
        from = "Column::MessageId",
        to = "super::message::Column::Id",
        on_delete = "Cascade"
    )]
    Message,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
