//! Chat history construction

use crate::prompts::{system_message, NO_DOCUMENTS};
use crate::tools::unique_titles;
use chrono::NaiveDate;
use docchat_common::llm::{ChatMessage, Role};
use docchat_common::models::{Document, Message, MessageRole, MessageStatus};

/// Prior messages as chat history.
///
/// Only successful messages with non-blank content are kept, in their
/// stored order.
pub fn get_chat_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| m.status == MessageStatus::Success && !m.content.trim().is_empty())
        .map(|m| match m.role {
            MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
            MessageRole::System => ChatMessage::system(m.content.clone()),
            MessageRole::User => ChatMessage::user(m.content.clone()),
        })
        .collect()
}

/// `"- <title>"` lines, or the no-documents placeholder
pub fn document_titles_block(documents: &[Document]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS.to_string();
    }
    unique_titles(documents)
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// History with exactly one leading system message.
///
/// A system message already at the front is kept; otherwise the templated
/// prompt is prepended. System messages anywhere else are dropped.
pub fn build_prefix_messages(
    messages: &[Message],
    documents: &[Document],
    today: NaiveDate,
) -> Vec<ChatMessage> {
    let history = get_chat_history(messages);
    let mut prefix = Vec::with_capacity(history.len() + 1);

    let mut rest = history.into_iter().peekable();
    match rest.next_if(|m| m.role == Role::System) {
        Some(system) => prefix.push(system),
        None => prefix.push(ChatMessage::system(system_message(
            &document_titles_block(documents),
            &today.format("%Y-%m-%d").to_string(),
        ))),
    }
    prefix.extend(rest.filter(|m| m.role != Role::System));
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(role: MessageRole, content: &str, status: MessageStatus) -> Message {
        Message::new(Uuid::nil(), role, content, status)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    #[test]
    fn test_history_filters_failed_and_blank_messages() {
        let messages = vec![
            message(MessageRole::User, "hi", MessageStatus::Success),
            message(MessageRole::Assistant, "  ", MessageStatus::Success),
            message(MessageRole::User, "bye", MessageStatus::Error),
        ];

        let history = get_chat_history(&messages);
        assert_eq!(history, vec![ChatMessage::user("hi")]);

        let prefixed = build_prefix_messages(&messages, &[], today());
        assert_eq!(prefixed.len(), 2);
        assert_eq!(prefixed[0].role, Role::System);
        assert!(prefixed[0].content.contains(NO_DOCUMENTS));
        assert!(prefixed[0].content.contains("2024-05-06"));
        assert_eq!(prefixed[1], ChatMessage::user("hi"));
    }

    #[test]
    fn test_existing_leading_system_message_is_kept() {
        let messages = vec![
            message(MessageRole::System, "custom rules", MessageStatus::Success),
            message(MessageRole::User, "hi", MessageStatus::Success),
            message(MessageRole::System, "late rules", MessageStatus::Success),
            message(MessageRole::Assistant, "hello", MessageStatus::Success),
        ];

        let prefixed = build_prefix_messages(&messages, &[], today());
        assert_eq!(
            prefixed,
            vec![
                ChatMessage::system("custom rules"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
            ]
        );
    }

    #[test]
    fn test_titles_block_lists_documents() {
        let docs = vec![
            Document::new("s3://docs/a.pdf", None),
            Document::new("s3://docs/b.pdf", None),
        ];
        assert_eq!(document_titles_block(&docs), "- a.pdf\n- b.pdf");

        let prefixed = build_prefix_messages(&[], &docs, today());
        assert_eq!(prefixed.len(), 1);
        assert!(prefixed[0].content.contains("- a.pdf\n- b.pdf"));
    }
}
