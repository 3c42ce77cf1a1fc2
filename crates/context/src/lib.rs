//! DocChat Context Engine
//!
//! Turns a conversation plus its selected documents into a cited answer:
//! - Per-document query engine tools
//! - Sub-question planning over those tools
//! - Response synthesis from question/answer pairs
//! - Chat history construction with a leading system prompt
//! - Full (function-calling) and simple (context chat) engines
//! - A turn runner that persists the answer and streams turn events

pub mod agent;
pub mod engine;
pub mod events;
pub mod history;
pub mod planner;
pub mod prompts;
pub mod synthesizer;
pub mod tools;
pub mod turn;

#[cfg(test)]
mod testing;

pub use agent::FunctionCallingAgent;
pub use engine::{ChatEngine, ChatEngineFactory, ContextChatEngine};
pub use events::{EventSink, TurnEvent};
pub use history::{build_prefix_messages, get_chat_history};
pub use planner::{PlannerResponse, SubQuestion, SubQuestionPlanner, PLANNER_TOOL_NAME};
pub use synthesizer::ResponseSynthesizer;
pub use tools::{
    build_description_for_document, build_title_for_document, document_tools, QueryEngineTool,
};
pub use turn::{ChatTurn, TurnStore};
