//! Model client.
//!
//! [`ChatModel`] is the seam between the orchestrator and any concrete
//! model backend; [`HttpChatModel`] implements it against the Anthropic
//! Messages API with streaming SSE. Tests drive the orchestrator with
//! scripted implementations of the trait.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::streaming::SseParser;
use crate::llm::types::{
    ChatRequest, Message, ModelTurn, Role, StreamDelta, StreamEvent, ToolCall,
};

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Callback receiving each text delta as it streams.
pub type TextSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// One model backend the orchestrator can stream turns from.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stream one model round-trip. Text deltas are delivered through
    /// `on_text` as they arrive; the aggregated turn is returned at the end.
    async fn stream_turn(&self, request: &ChatRequest, on_text: TextSink<'_>)
    -> Result<ModelTurn>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Configuration for the HTTP model client.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
}

impl ModelConfig {
    /// Configuration for the Anthropic Claude API.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: 4096,
        }
    }
}

/// Streams turns from the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct HttpChatModel {
    config: Arc<ModelConfig>,
    http: reqwest::Client,
}

impl HttpChatModel {
    /// Create a new client with the given configuration.
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingModelKey);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Build the JSON body for the Messages API.
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let (system_text, messages) = split_system_message(&request.messages);

        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
            "stream": true,
        });

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            let tool_values: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tool_values);
        }

        body
    }

    /// Send the HTTP request to the Messages endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                AgentError::LlmRequestFailed {
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending model request");

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn stream_turn(
        &self,
        request: &ChatRequest,
        on_text: TextSink<'_>,
    ) -> Result<ModelTurn> {
        let body = self.build_request_body(request);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let mut parser = SseParser::new();
        let mut accumulator = TurnAccumulator::default();
        let mut byte_stream = resp.bytes_stream();

        // Buffer for partial lines that span chunk boundaries.
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| AgentError::LlmStreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let text = std::str::from_utf8(&chunk).map_err(|e| AgentError::LlmStreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;

            line_buffer.push_str(text);

            // SSE lines are delimited by `\n`.
            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer = line_buffer[newline_pos + 1..].to_owned();

                if let Some(event) = parser.parse_line(&line)? {
                    accumulator.apply(&event, on_text);

                    if matches!(event, StreamEvent::MessageStop) {
                        return accumulator.into_turn();
                    }
                }
            }
        }

        // Stream ended without a MessageStop; return what we have.
        accumulator.into_turn()
    }
}

// ---------------------------------------------------------------------------
// Wire conversion
// ---------------------------------------------------------------------------

/// Split the system message out (the API expects it as a top-level field)
/// and convert the remaining messages to the wire format.
fn split_system_message(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                // Only a single system block is supported; concat if
                // multiple system messages exist.
                match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&msg.content);
                    }
                    None => system = Some(msg.content.clone()),
                }
            }
            Role::User => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": msg.content,
                }));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": msg.content,
                    }));
                } else {
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({
                            "type": "text",
                            "text": msg.content,
                        }));
                    }
                    for tc in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": content,
                    }));
                }
            }
        }
    }

    (system, wire_messages)
}

// ---------------------------------------------------------------------------
// Turn accumulator
// ---------------------------------------------------------------------------

/// Accumulates fragments from streaming events into a complete turn.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    tool_calls: Vec<ToolCallBuilder>,
    stop_reason: Option<String>,
}

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug)]
struct ToolCallBuilder {
    id: String,
    name: String,
    input_json: String,
}

impl TurnAccumulator {
    /// Apply a single stream event.
    fn apply(&mut self, event: &StreamEvent, on_text: TextSink<'_>) {
        match event {
            StreamEvent::ContentBlockStart {
                content_type,
                id,
                name,
                ..
            } => {
                if content_type == "tool_use" {
                    self.tool_calls.push(ToolCallBuilder {
                        id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    });
                }
            }

            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                StreamDelta::TextDelta(t) => {
                    self.text.push_str(t);
                    on_text(t);
                }
                StreamDelta::InputJsonDelta(j) => {
                    if let Some(builder) = self.tool_calls.last_mut() {
                        builder.input_json.push_str(j);
                    }
                }
            },

            StreamEvent::MessageDelta { stop_reason } => {
                self.stop_reason = stop_reason.clone();
            }

            // Other events don't affect the accumulator.
            _ => {}
        }
    }

    /// Convert the accumulated state into a [`ModelTurn`].
    fn into_turn(self) -> Result<ModelTurn> {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|b| {
                let arguments: Value = if b.input_json.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&b.input_json).map_err(|e| {
                        AgentError::LlmParseFailed {
                            reason: format!("invalid JSON in tool call `{}` input: {e}", b.name),
                        }
                    })?
                };
                Ok(ToolCall {
                    id: b.id,
                    name: b.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelTurn {
            text: self.text,
            tool_calls,
            stop_reason: self.stop_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolDefinition;
    use serde_json::json;

    #[test]
    fn empty_api_key_is_rejected() {
        let config = ModelConfig::anthropic("", "claude-sonnet-4-20250514");
        assert!(matches!(
            HttpChatModel::new(config),
            Err(AgentError::MissingModelKey)
        ));
    }

    #[test]
    fn build_request_body_basic() {
        let config = ModelConfig::anthropic("test-key", "claude-sonnet-4-20250514");
        let client = HttpChatModel::new(config).unwrap();

        let request = ChatRequest {
            model: String::new(),
            messages: vec![Message::system("You are helpful."), Message::user("Hello")],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(1024),
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stream"], true);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn build_request_body_with_tools_and_calls() {
        let config = ModelConfig::anthropic("test-key", "claude-sonnet-4-20250514");
        let client = HttpChatModel::new(config).unwrap();

        let call = ToolCall {
            id: "tu_1".into(),
            name: "quote".into(),
            arguments: json!({"symbol": "AAPL"}),
        };
        let request = ChatRequest {
            model: String::new(),
            messages: vec![
                Message::user("Quote AAPL"),
                Message::assistant_with_calls("", vec![call]),
                Message::tool_result("quote", "price 123"),
            ],
            tools: vec![ToolDefinition {
                name: "quote".into(),
                description: "Get a stock quote".into(),
                input_schema: json!({"type": "object"}),
            }],
            temperature: None,
            max_tokens: None,
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["tools"][0]["name"], "quote");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        // Tool results travel as synthetic user text.
        assert_eq!(messages[2]["role"], "user");
        let content = messages[2]["content"].as_str().unwrap();
        assert!(content.starts_with("Tool result for quote:"));
    }

    #[test]
    fn accumulator_assembles_tool_call_from_deltas() {
        let mut acc = TurnAccumulator::default();
        let mut sink = |_: &str| {};

        acc.apply(
            &StreamEvent::ContentBlockStart {
                index: 0,
                content_type: "tool_use".into(),
                id: Some("tu_1".into()),
                name: Some("search_tool".into()),
            },
            &mut sink,
        );
        acc.apply(
            &StreamEvent::ContentBlockDelta {
                index: 0,
                delta: StreamDelta::InputJsonDelta(r#"{"query":"#.into()),
            },
            &mut sink,
        );
        acc.apply(
            &StreamEvent::ContentBlockDelta {
                index: 0,
                delta: StreamDelta::InputJsonDelta(r#""files"}"#.into()),
            },
            &mut sink,
        );

        let turn = acc.into_turn().unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "search_tool");
        assert_eq!(turn.tool_calls[0].arguments["query"], "files");
    }

    #[test]
    fn accumulator_collects_text_and_notifies_sink() {
        let mut acc = TurnAccumulator::default();
        let mut seen = String::new();
        let mut sink = |t: &str| seen.push_str(t);

        acc.apply(
            &StreamEvent::ContentBlockDelta {
                index: 0,
                delta: StreamDelta::TextDelta("Hel".into()),
            },
            &mut sink,
        );
        acc.apply(
            &StreamEvent::ContentBlockDelta {
                index: 0,
                delta: StreamDelta::TextDelta("lo".into()),
            },
            &mut sink,
        );

        let turn = acc.into_turn().unwrap();
        assert_eq!(turn.text, "Hello");
        assert_eq!(seen, "Hello");
    }
}
