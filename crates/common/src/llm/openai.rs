use super::{ChatMessage, ChatRequest, ChatResponse, LlmClient, Role, TokenStream, ToolCall};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    tool_model: String,
    chat_model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    r#type: function_type(),
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl OpenAiChatClient {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            tool_model: config.tool_model.clone(),
            chat_model: config.chat_model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn wire_request<'a>(
        &self,
        model: &'a str,
        request: &'a ChatRequest,
        stream: bool,
    ) -> WireRequest<'a> {
        WireRequest {
            model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    r#type: "function",
                    function: WireFunctionSpec {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            temperature: request.temperature,
            stream,
        }
    }

    /// POST with exponential backoff on 429/5xx and connection failures
    async fn send(&self, body: &WireRequest<'_>) -> Result<reqwest::Response> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let attempt = attempt;
            async move {
                let outcome = self
                    .client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(body)
                    .send()
                    .await;

                let (err, transient) = match outcome {
                    Ok(resp) if resp.status().is_success() => return Ok(resp),
                    Ok(resp) => {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        (
                            AppError::LlmError {
                                message: format!("API error {}: {}", status, text),
                            },
                            status.is_server_error() || status.as_u16() == 429,
                        )
                    }
                    Err(e) => {
                        let transient = e.is_timeout() || e.is_connect();
                        (
                            AppError::LlmError {
                                message: format!("Request failed: {}", e),
                            },
                            transient,
                        )
                    }
                };

                if transient && attempt <= self.max_retries {
                    tracing::warn!(attempt, error = %err, "LLM request failed, retrying");
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                }
            }
        })
        .await
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.wire_request(&self.tool_model, &request, false);
        let response = self.send(&body).await?;

        let parsed: WireResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".to_string(),
            })?;

        Ok(ChatResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
        })
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream> {
        let body = self.wire_request(&self.chat_model, &request, true);
        let response = self.send(&body).await?;
        Ok(sse_tokens(Box::pin(response.bytes_stream())))
    }
}

struct SseState<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    done: bool,
}

/// Decode an SSE body of chat-completion chunks into content fragments
fn sse_tokens<S, B>(bytes: S) -> TokenStream
where
    S: futures::Stream<Item = reqwest::Result<B>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    drain_lines(&mut state);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(AppError::LlmError {
                        message: format!("Stream interrupted: {}", e),
                    }));
                    state.done = true;
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

fn drain_lines<S>(state: &mut SseState<S>) {
    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();

        if data == "[DONE]" {
            state.done = true;
            state.buffer.clear();
            return;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => state.pending.extend(
                chunk
                    .choices
                    .into_iter()
                    .filter_map(|c| c.delta.content)
                    .filter(|c| !c.is_empty())
                    .map(Ok),
            ),
            Err(e) => state.pending.push_back(Err(AppError::LlmError {
                message: format!("Malformed stream chunk: {}", e),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> TokenStream {
        let owned: Vec<reqwest::Result<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        sse_tokens(futures::stream::iter(owned))
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let stream = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);

        let tokens: Vec<String> = stream.map(|t| t.unwrap()).collect().await;
        assert_eq!(tokens, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_sse_skips_role_only_deltas() {
        let stream = chunks(&[
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        ]);

        let tokens: Vec<String> = stream.map(|t| t.unwrap()).collect().await;
        assert_eq!(tokens, vec!["ok"]);
    }

    #[test]
    fn test_wire_request_shape() {
        let client = OpenAiChatClient::new("sk-test".into(), &LlmConfig::default()).unwrap();
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_tools(vec![
            super::super::ToolSpec {
                name: "qualitative_question_engine".into(),
                description: "Answers questions".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ]);

        let wire = serde_json::to_value(client.wire_request("gpt-test", &request, false)).unwrap();
        assert_eq!(wire["model"], "gpt-test");
        assert_eq!(wire["messages"][0]["role"], "user");
        assert_eq!(wire["tools"][0]["type"], "function");
        assert_eq!(wire["tools"][0]["function"]["name"], "qualitative_question_engine");
        assert_eq!(wire["temperature"], 0.0);
    }
}
