//! LLM interaction layer: types, SSE parsing, and the model client.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::{ChatModel, HttpChatModel, ModelConfig, TextSink};
pub use streaming::SseParser;
pub use types::{
    ChatRequest, Message, ModelTurn, Role, StreamDelta, StreamEvent, ToolCall, ToolDefinition,
};
