//! Turn event frames.
//!
//! Everything the orchestrator emits during a turn, in the exact JSON
//! shapes the SSE transport writes. Events flow through an mpsc channel to
//! the HTTP layer, which frames each as `data: <json>\n\n` (the terminal
//! marker is the literal `data: [DONE]\n\n`).

use serde_json::{Value, json};

/// One event in a turn's SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A sanitized chunk of assistant text.
    Content { text: String },

    /// The model requested a tool call.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },

    /// A tool call finished (or was blocked by loop detection).
    ToolResult {
        tool_name: String,
        server_id: String,
        result: String,
        metadata: Option<Value>,
        accounts: Vec<String>,
        blocked: bool,
    },

    /// Progress of the memory-extraction post-step.
    MemoryTask { status: String, count: Option<u32> },

    /// Informational notice (iteration cap reached).
    Info { message: String },

    /// The turn aborted.
    Error { message: String },

    /// Terminal marker.
    Done,
}

impl TurnEvent {
    /// The JSON payload for the `data:` line. `Done` has no JSON body —
    /// use [`TurnEvent::to_frame`] for the wire form.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Content { text } => Some(json!({ "content": text })),
            Self::ToolCall {
                id,
                name,
                arguments,
            } => Some(json!({
                "type": "tool_call",
                "toolCall": { "id": id, "name": name, "arguments": arguments }
            })),
            Self::ToolResult {
                tool_name,
                server_id,
                result,
                metadata,
                accounts,
                blocked,
            } => {
                let mut payload = json!({
                    "type": "tool_result",
                    "toolName": tool_name,
                    "serverId": server_id,
                    "result": result,
                });
                if let Some(metadata) = metadata {
                    payload["metadata"] = metadata.clone();
                }
                if !accounts.is_empty() {
                    payload["accounts"] = json!(accounts);
                }
                if *blocked {
                    payload["blocked"] = json!(true);
                }
                Some(payload)
            }
            Self::MemoryTask { status, count } => {
                let mut payload = json!({ "type": "memory_task", "status": status });
                if let Some(count) = count {
                    payload["count"] = json!(count);
                }
                Some(payload)
            }
            Self::Info { message } => Some(json!({ "type": "info", "message": message })),
            Self::Error { message } => {
                Some(json!({ "type": "error", "message": message, "error": true }))
            }
            Self::Done => None,
        }
    }

    /// The full SSE frame, `data: <payload>\n\n`.
    pub fn to_frame(&self) -> String {
        match self.to_json() {
            Some(payload) => format!("data: {payload}\n\n"),
            None => "data: [DONE]\n\n".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_frame_shape() {
        let frame = TurnEvent::Content {
            text: "hello".into(),
        }
        .to_frame();
        assert_eq!(frame, "data: {\"content\":\"hello\"}\n\n");
    }

    #[test]
    fn done_frame_is_literal() {
        assert_eq!(TurnEvent::Done.to_frame(), "data: [DONE]\n\n");
    }

    #[test]
    fn tool_result_omits_empty_annotations() {
        let event = TurnEvent::ToolResult {
            tool_name: "quote".into(),
            server_id: "alpha_vantage".into(),
            result: "123".into(),
            metadata: None,
            accounts: vec![],
            blocked: false,
        };
        let payload = event.to_json().unwrap();
        assert!(payload.get("metadata").is_none());
        assert!(payload.get("accounts").is_none());
        assert!(payload.get("blocked").is_none());
        assert_eq!(payload["serverId"], "alpha_vantage");
    }

    #[test]
    fn blocked_tool_result_sets_flag() {
        let event = TurnEvent::ToolResult {
            tool_name: "quote".into(),
            server_id: "alpha_vantage".into(),
            result: "blocked".into(),
            metadata: None,
            accounts: vec![],
            blocked: true,
        };
        assert_eq!(event.to_json().unwrap()["blocked"], true);
    }

    #[test]
    fn error_frame_carries_flag() {
        let payload = TurnEvent::Error {
            message: "boom".into(),
        }
        .to_json()
        .unwrap();
        assert_eq!(payload["error"], true);
        assert_eq!(payload["type"], "error");
    }
}
