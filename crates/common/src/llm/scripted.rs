use super::{ChatRequest, ChatResponse, LlmClient, Role, TokenStream};
use crate::errors::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&ChatRequest) -> Result<ChatResponse> + Send + Sync;

/// Deterministic chat client driven by a closure.
///
/// Every request is recorded so callers can assert on prompts and tools.
/// Streaming splits the scripted content at whitespace boundaries.
#[derive(Clone)]
pub struct ScriptedLlm {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedLlm {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer with the same text
    pub fn fixed(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self::new(move |_| Ok(ChatResponse::text(answer.clone())))
    }

    /// Answer with the last user message prefixed by "Echo: "
    pub fn echo() -> Self {
        Self::new(|req| {
            let last = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse::text(format!("Echo: {}", last)))
        })
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn respond(&self, request: ChatRequest) -> Result<ChatResponse> {
        let response = (self.responder)(&request);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        response
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.respond(request)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream> {
        let content = self.respond(request)?.content.unwrap_or_default();
        let tokens: Vec<Result<String>> = content
            .split_inclusive(char::is_whitespace)
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(futures::stream::iter(tokens).boxed())
    }
}
