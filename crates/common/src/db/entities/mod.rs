//! SeaORM entity models
//!
//! Enum-valued columns are stored as text using the wire names of the
//! corresponding `crate::models` enums.

mod conversation;
mod conversation_document;
mod document;
mod message;
mod message_sub_process;

pub use conversation::{
    ActiveModel as ConversationActiveModel, Column as ConversationColumn,
    Entity as ConversationEntity, Model as ConversationRow,
};

pub use conversation_document::{
    ActiveModel as ConversationDocumentActiveModel, Column as ConversationDocumentColumn,
    Entity as ConversationDocumentEntity, Model as ConversationDocumentRow,
};

pub use document::{
    ActiveModel as DocumentActiveModel, Column as DocumentColumn, Entity as DocumentEntity,
    Model as DocumentRow,
};

pub use message::{
    ActiveModel as MessageActiveModel, Column as MessageColumn, Entity as MessageEntity,
    Model as MessageRow,
};

pub use message_sub_process::{
    ActiveModel as SubProcessActiveModel, Column as SubProcessColumn, Entity as SubProcessEntity,
    Model as SubProcessRow,
};
