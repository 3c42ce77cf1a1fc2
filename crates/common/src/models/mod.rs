//! Conversation and document schema shared by every service

/// Declares a fieldless enum stored as text, with serde, `as_str`, `Display` and `FromStr`
/// all agreeing on the same wire names.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::errors::AppError::Validation {
                        message: format!("unknown {} '{}'", stringify!($name), other),
                        field: None,
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

mod citation;
mod conversation;
mod document;

pub use citation::{Citation, QuestionAnswerPair, RELEVANT_SNIPPETS_QUESTION};
pub use conversation::{
    Conversation, Message, MessageRole, MessageStatus, MessageSubProcess, SubProcessMetadata,
    SubProcessSource, SubProcessStatus,
};
pub use document::{DocType, Document, DocumentMetadataMap, EventDocumentMetadata};
