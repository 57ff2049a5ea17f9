//! Tool-result post-processors.
//!
//! A few tools get their raw results reshaped before they re-enter the
//! conversation: `convert_to_markdown` splits oversized output into cached
//! preview files, and the Gmail message/thread tools are normalized into a
//! canonical cached record plus a short summary. `display_email` passes
//! through untouched (the client detects its marker), as does everything
//! else.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use tandem_adapters::ToolOutcome;
use tandem_store::FileCache;

/// Fenced code blocks longer than this many lines are split into their own
/// cache files.
const CODE_BLOCK_LINE_LIMIT: usize = 10;

/// Markdown output at or below this many lines is left inline.
const MARKDOWN_LINE_LIMIT: usize = 10;

/// Characters of markdown shown inline after the preview links.
const EXCERPT_CHARS: usize = 500;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9+-]*)\n(.*?)```").expect("static regex")
});

/// Applies per-tool result reshaping backed by the file cache.
pub struct PostProcessor {
    cache: FileCache,
}

impl PostProcessor {
    pub fn new(cache: FileCache) -> Self {
        Self { cache }
    }

    /// Reshape `outcome` for the given tool. Unknown tools pass through.
    pub async fn process(
        &self,
        tool_name: &str,
        server_id: &str,
        arguments: &Value,
        outcome: ToolOutcome,
    ) -> ToolOutcome {
        if outcome.is_error() {
            return outcome;
        }
        match tool_name {
            // The client detects the display marker in the raw text.
            "display_email" => outcome,
            "convert_to_markdown" => self.process_markdown(arguments, outcome).await,
            "get_message" if server_id == "gmail" => self.process_gmail_message(outcome).await,
            "get_thread" if server_id == "gmail" => self.process_gmail_thread(outcome).await,
            _ => outcome,
        }
    }

    // ── convert_to_markdown ──────────────────────────────────────────

    async fn process_markdown(&self, arguments: &Value, outcome: ToolOutcome) -> ToolOutcome {
        let raw = outcome.render();
        if raw.lines().count() <= MARKDOWN_LINE_LIMIT {
            return outcome;
        }

        // Some converters wrap the markdown in a JSON envelope.
        let body = match serde_json::from_str::<Value>(raw) {
            Ok(envelope) => envelope
                .get("markdown")
                .or_else(|| envelope.get("text"))
                .or_else(|| envelope.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| raw.to_string()),
            Err(_) => raw.to_string(),
        };

        // Split out oversized fenced code blocks into their own files.
        let mut extracted: Vec<(String, String)> = Vec::new(); // (cache id, label)
        let mut residual = String::with_capacity(body.len());
        let mut last_end = 0;

        for (position, captures) in FENCE_RE.captures_iter(&body).enumerate() {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let lang = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            let code = captures.get(2).map(|m| m.as_str()).unwrap_or("");

            residual.push_str(&body[last_end..whole.start()]);
            last_end = whole.end();

            if code.lines().count() <= CODE_BLOCK_LINE_LIMIT {
                residual.push_str(whole.as_str());
                continue;
            }

            let ext = code_extension(lang);
            let id = format!("code_{}_{}", Uuid::now_v7().simple(), position + 1);
            let label = format!("code-block-{}.{ext}", position + 1);
            match self.cache.write_string(&id, ext, code).await {
                Ok(_) => {
                    residual.push_str(&format!("[preview-file:{label}]({id})"));
                    extracted.push((id, label));
                }
                Err(e) => {
                    warn!(error = %e, "code block cache write failed; keeping inline");
                    residual.push_str(whole.as_str());
                }
            }
        }
        residual.push_str(&body[last_end..]);

        // The residual markdown itself becomes a preview file.
        let markdown_id = format!("md_{}", Uuid::now_v7().simple());
        if let Err(e) = self.cache.write_string(&markdown_id, "md", &residual).await {
            warn!(error = %e, "markdown cache write failed; returning raw result");
            return outcome;
        }

        let mut response = String::from("Converted document to markdown.\n");
        if let Some(source_id) = source_cache_id(arguments, &self.cache) {
            response.push_str(&format!("[preview-file:original]({source_id})\n"));
        }
        response.push_str(&format!("[preview-file:document.md]({markdown_id})\n"));
        for (id, label) in &extracted {
            response.push_str(&format!("[preview-file:{label}]({id})\n"));
        }

        let excerpt: String = residual.chars().take(EXCERPT_CHARS).collect();
        response.push('\n');
        response.push_str(&excerpt);

        debug!(
            markdown_id,
            code_blocks = extracted.len(),
            "markdown result cached"
        );
        ToolOutcome::text(response)
    }

    // ── gmail ────────────────────────────────────────────────────────

    async fn process_gmail_message(&self, outcome: ToolOutcome) -> ToolOutcome {
        let Ok(payload) = serde_json::from_str::<Value>(outcome.render()) else {
            return outcome;
        };
        let Some(normalized) = normalize_email(&payload) else {
            return outcome;
        };

        let id = normalized["id"].as_str().unwrap_or_default().to_string();
        let cache_id = format!("gmail_email_{id}");
        if let Err(e) = self
            .cache
            .write_string(&cache_id, "json", &normalized.to_string())
            .await
        {
            warn!(error = %e, "gmail cache write failed; returning raw result");
            return outcome;
        }

        let accounts = outcome.accounts.clone();
        let mut result = ToolOutcome::text(format!(
            "[GMAIL_CACHE_ID: {cache_id}]\n{}",
            email_summary(&normalized)
        ));
        if !accounts.is_empty() {
            result = result.with_accounts(accounts);
        }
        result
    }

    async fn process_gmail_thread(&self, outcome: ToolOutcome) -> ToolOutcome {
        let Ok(payload) = serde_json::from_str::<Value>(outcome.render()) else {
            return outcome;
        };
        let Some(thread_id) = payload.get("id").and_then(Value::as_str) else {
            return outcome;
        };
        let raw_messages = payload
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let normalized: Vec<Value> = raw_messages.iter().filter_map(normalize_email).collect();
        let aggregate = json!({ "id": thread_id, "messages": normalized });

        let cache_id = format!("gmail_email_thread_{thread_id}");
        if let Err(e) = self
            .cache
            .write_string(&cache_id, "json", &aggregate.to_string())
            .await
        {
            warn!(error = %e, "gmail thread cache write failed; returning raw result");
            return outcome;
        }

        let mut summary = format!(
            "[GMAIL_CACHE_ID: {cache_id}]\nThread with {} messages:\n",
            aggregate["messages"].as_array().map(Vec::len).unwrap_or(0)
        );
        for message in aggregate["messages"].as_array().into_iter().flatten() {
            summary.push_str(&format!(
                "- {} — {}\n",
                message["fromName"].as_str().unwrap_or("unknown sender"),
                message["subject"].as_str().unwrap_or("(no subject)"),
            ));
        }
        ToolOutcome::text(summary)
    }
}

// ---------------------------------------------------------------------------
// Email normalization
// ---------------------------------------------------------------------------

/// Normalize a provider email payload into the canonical shape:
/// `{id, subject, from, fromName, to[], cc[]?, date, body, isHtml, snippet}`.
///
/// Accepts either an already-flat record or the Gmail API shape with
/// `payload.headers` and base64url body parts.
fn normalize_email(payload: &Value) -> Option<Value> {
    let id = payload.get("id")?.as_str()?.to_string();

    // Flat record: pass its fields through.
    if payload.get("payload").is_none() {
        let from_raw = payload.get("from").and_then(Value::as_str).unwrap_or("");
        let (from, from_name) = split_address(from_raw);
        return Some(json!({
            "id": id,
            "subject": payload.get("subject").and_then(Value::as_str).unwrap_or(""),
            "from": from,
            "fromName": from_name,
            "to": payload.get("to").cloned().unwrap_or_else(|| json!([])),
            "cc": payload.get("cc").cloned().unwrap_or_else(|| json!([])),
            "date": payload.get("date").and_then(Value::as_str).unwrap_or(""),
            "body": payload.get("body").and_then(Value::as_str).unwrap_or(""),
            "isHtml": payload.get("isHtml").and_then(Value::as_bool).unwrap_or(false),
            "snippet": payload.get("snippet").and_then(Value::as_str).unwrap_or(""),
        }));
    }

    // Gmail API shape.
    let headers = payload["payload"]["headers"].as_array()?;
    let header = |name: &str| {
        headers
            .iter()
            .find(|h| {
                h["name"]
                    .as_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|h| h["value"].as_str())
            .unwrap_or("")
            .to_string()
    };

    let (from, from_name) = split_address(&header("From"));
    let (body, is_html) = extract_body(&payload["payload"]);

    Some(json!({
        "id": id,
        "subject": header("Subject"),
        "from": from,
        "fromName": from_name,
        "to": split_address_list(&header("To")),
        "cc": split_address_list(&header("Cc")),
        "date": header("Date"),
        "body": body,
        "isHtml": is_html,
        "snippet": payload.get("snippet").and_then(Value::as_str).unwrap_or(""),
    }))
}

/// Split `"Name <addr@host>"` into `(addr, name)`.
fn split_address(raw: &str) -> (String, String) {
    if let Some(open) = raw.rfind('<') {
        let addr = raw[open + 1..].trim_end_matches('>').trim().to_string();
        let name = raw[..open].trim().trim_matches('"').to_string();
        (addr, name)
    } else {
        (raw.trim().to_string(), String::new())
    }
}

fn split_address_list(raw: &str) -> Value {
    let list: Vec<String> = raw
        .split(',')
        .map(|part| split_address(part).0)
        .filter(|addr| !addr.is_empty())
        .collect();
    json!(list)
}

/// Pull the body text out of a Gmail payload node: an inline base64url
/// body, or the first text part (preferring plain over html).
fn extract_body(payload: &Value) -> (String, bool) {
    let decode = |node: &Value| {
        node["body"]["data"]
            .as_str()
            .and_then(|data| URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
    };

    let mime = payload["mimeType"].as_str().unwrap_or("");
    if let Some(body) = decode(payload) {
        return (body, mime == "text/html");
    }

    if let Some(parts) = payload["parts"].as_array() {
        for wanted in ["text/plain", "text/html"] {
            for part in parts {
                if part["mimeType"].as_str() == Some(wanted)
                    && let Some(body) = decode(part)
                {
                    return (body, wanted == "text/html");
                }
            }
        }
    }

    (String::new(), false)
}

/// Short human summary of a normalized email.
fn email_summary(normalized: &Value) -> String {
    let snippet = normalized["snippet"].as_str().unwrap_or("");
    let body = normalized["body"].as_str().unwrap_or("");
    let preview: String = if snippet.is_empty() {
        body.chars().take(200).collect()
    } else {
        snippet.to_string()
    };
    format!(
        "Subject: {}\nFrom: {} <{}>\nDate: {}\n\n{preview}",
        normalized["subject"].as_str().unwrap_or("(no subject)"),
        normalized["fromName"].as_str().unwrap_or(""),
        normalized["from"].as_str().unwrap_or(""),
        normalized["date"].as_str().unwrap_or(""),
    )
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// File extension for a fenced block language tag.
fn code_extension(lang: &str) -> &'static str {
    match lang.to_lowercase().as_str() {
        "rust" | "rs" => "rs",
        "python" | "py" => "py",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "json" => "json",
        "sql" => "sql",
        "bash" | "sh" | "shell" => "sh",
        "html" => "html",
        "css" => "css",
        "yaml" | "yml" => "yml",
        _ => "txt",
    }
}

/// If the arguments reference a previewable cached source, its cache id.
fn source_cache_id(arguments: &Value, cache: &FileCache) -> Option<String> {
    let candidate = ["uri", "path", "file", "source"]
        .iter()
        .find_map(|key| arguments.get(key).and_then(Value::as_str))?;

    // `file:///…/cache/{id}.{ext}` or a bare id.
    let stem = candidate
        .rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .unwrap_or(candidate);

    cache.exists(stem).then(|| stem.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
