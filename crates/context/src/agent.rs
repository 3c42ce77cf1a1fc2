//! Function-calling chat agent
//!
//! The agent offers the sub-question planner as its only tool and lets the
//! model call it a bounded number of times per turn. Without documents no
//! tool is offered and the agent answers as a general assistant.

use crate::engine::ChatEngine;
use crate::events::EventSink;
use crate::planner::{SubQuestionPlanner, PLANNER_TOOL_NAME};
use async_trait::async_trait;
use docchat_common::errors::Result;
use docchat_common::llm::{ChatMessage, ChatRequest, LlmClient, ToolCall, ToolSpec};
use docchat_common::models::{SubProcessMetadata, SubProcessSource};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Deserialize)]
struct PlannerArgs {
    input: String,
}

pub struct FunctionCallingAgent {
    llm: Arc<dyn LlmClient>,
    prefix_messages: Vec<ChatMessage>,
    planner: Option<SubQuestionPlanner>,
    max_function_calls: usize,
}

impl FunctionCallingAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prefix_messages: Vec<ChatMessage>,
        planner: Option<SubQuestionPlanner>,
        max_function_calls: usize,
    ) -> Self {
        Self {
            llm,
            prefix_messages,
            planner,
            max_function_calls,
        }
    }

    pub fn prefix_messages(&self) -> &[ChatMessage] {
        &self.prefix_messages
    }

    pub fn planner(&self) -> Option<&SubQuestionPlanner> {
        self.planner.as_ref()
    }

    /// Tools offered to the model
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.planner
            .iter()
            .map(|_| SubQuestionPlanner::tool_spec())
            .collect()
    }

    async fn call_tool(&self, call: &ToolCall, sink: &EventSink) -> Result<String> {
        let planner = match &self.planner {
            Some(planner) if call.name == PLANNER_TOOL_NAME => planner,
            _ => {
                warn!(tool = %call.name, "Model called an unknown tool");
                return Ok(format!("Error: tool {} does not exist", call.name));
            }
        };

        // Some models send the bare question instead of the arguments object
        let input = serde_json::from_str::<PlannerArgs>(&call.arguments)
            .map(|args| args.input)
            .unwrap_or_else(|_| call.arguments.clone());

        let answer = planner.query(&input, sink).await?;
        Ok(answer.response)
    }
}

#[async_trait]
impl ChatEngine for FunctionCallingAgent {
    #[instrument(skip(self, message, sink), fields(message_id = %sink.message_id()))]
    async fn chat(&self, message: &str, sink: &EventSink) -> Result<String> {
        let tools = self.tool_specs();
        let mut messages = self.prefix_messages.clone();
        messages.push(ChatMessage::user(message));
        let mut calls = 0;

        loop {
            let offer_tools = !tools.is_empty() && calls < self.max_function_calls;
            let mut request = ChatRequest::new(messages.clone()).with_temperature(0.0);
            if offer_tools {
                request = request.with_tools(tools.clone());
            }

            let response = self.llm.chat(request).await?;
            if !offer_tools || response.tool_calls.is_empty() {
                let answer = response.content.unwrap_or_default();
                debug!(function_calls = calls, "Agent answered");
                if !answer.is_empty() {
                    sink.delta(answer.clone());
                }
                return Ok(answer);
            }

            messages.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));
            for call in response.tool_calls {
                let output = if calls < self.max_function_calls {
                    calls += 1;
                    info!(tool = %call.name, call = calls, "Calling tool");
                    let output = self.call_tool(&call, sink).await?;
                    sink.sub_process(
                        SubProcessSource::FunctionCall,
                        SubProcessMetadata::with_function_output(output.clone()),
                    );
                    output
                } else {
                    warn!(tool = %call.name, "Function call limit reached, skipping call");
                    "Error: function call limit reached".to_string()
                };
                messages.push(ChatMessage::tool(call.id, output));
            }
        }
    }
}
