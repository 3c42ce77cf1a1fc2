//! Prompt templates

use crate::tools::QueryEngineTool;
use docchat_common::models::QuestionAnswerPair;
use std::fmt::Write;

/// Placeholder listed when a conversation has no documents
pub const NO_DOCUMENTS: &str = "No documents selected.";

/// Leading system prompt of every conversation
pub fn system_message(doc_titles: &str, curr_date: &str) -> String {
    format!(
        "You are an expert assistant that answers questions about documents the user \
         selected for this conversation.\n\
         \n\
         The user selected these documents:\n\
         {doc_titles}\n\
         \n\
         Today's date is {curr_date}.\n\
         \n\
         When a tool is available, use it for any question about the selected documents \
         before answering. Mention page numbers when the tool output provides them. \
         If the documents do not contain the answer, say so plainly instead of guessing."
    )
}

/// Asks the model to split `query` into per-tool sub-questions
pub fn decompose_prompt(tools: &[QueryEngineTool], query: &str) -> String {
    let mut tool_list = String::new();
    for tool in tools {
        let _ = writeln!(tool_list, "- {}: {}", tool.name, tool.description);
    }

    format!(
        "Given a user question and a list of tools, output a list of relevant \
         sub-questions that, when answered, are enough to answer the user question. \
         Route every sub-question to exactly one tool.\n\
         \n\
         Tools:\n\
         {tool_list}\n\
         Respond with a JSON array only, in this format:\n\
         [{{\"sub_question\": \"...\", \"tool_name\": \"...\"}}]\n\
         \n\
         User question: {query}\n"
    )
}

/// Final answer prompt over the collected sub-question answers
pub fn synthesis_prompt(document_titles: &[String], pairs: &[QuestionAnswerPair], query: &str) -> String {
    let mut context = String::new();
    if !document_titles.is_empty() {
        context.push_str("Selected documents:\n");
        for title in document_titles {
            let _ = writeln!(context, "- {}", title);
        }
        context.push('\n');
    }
    for pair in pairs {
        let _ = writeln!(context, "Sub question: {}", pair.question);
        let _ = writeln!(context, "Response: {}", pair.answer.as_deref().unwrap_or_default());
        context.push('\n');
    }

    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: "
    )
}

/// System prompt addition carrying retrieved passages for context chat
pub fn context_block(context: &str) -> String {
    format!(
        "Context information is below.\n\
         --------------------\n\
         {context}\n\
         --------------------\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_lists_titles_and_date() {
        let prompt = system_message("- a.pdf\n- b.pdf", "2024-05-06");
        assert!(prompt.contains("- a.pdf\n- b.pdf"));
        assert!(prompt.contains("Today's date is 2024-05-06."));
    }

    #[test]
    fn test_synthesis_prompt_keeps_pair_order() {
        let pairs: Vec<QuestionAnswerPair> = ["first", "second"]
            .iter()
            .map(|q| QuestionAnswerPair {
                question: q.to_string(),
                answer: Some(format!("{} answer", q)),
                citations: None,
            })
            .collect();
        let prompt = synthesis_prompt(&["a.pdf".into()], &pairs, "what?");

        let first = prompt.find("Sub question: first").unwrap();
        let second = prompt.find("Sub question: second").unwrap();
        assert!(first < second);
        assert!(prompt.contains("- a.pdf"));
        assert!(prompt.ends_with("Query: what?\nAnswer: "));
    }
}
