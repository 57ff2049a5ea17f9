//! Chat turn orchestrator.
//!
//! Executes one chat turn as a bounded tool-calling loop: stream a model
//! round-trip, execute the tool calls it requested (loop-detected, URI
//! resolved, schema validated, post-processed), feed the results back as
//! synthetic user messages, and repeat until the model stops calling tools
//! or the iteration cap is reached. Events stream out through an mpsc
//! channel in strict order; a bounded memory-extraction pass runs after the
//! loop, and the turn always terminates with the `[DONE]` frame.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use tandem_adapters::{
    MEMORY_READ_TOOLS, MEMORY_WRITE_TOOLS, ToolOutcome, memory_tool_descriptors,
    validate_arguments,
};
use tandem_auth::TokenService;
use tandem_store::{Author, BootstrapMode, MessageStore, RoleStore, SettingsStore, StoreError};

use crate::catalog::{SEARCH_TOOL_NAME, ToolCatalog, render_search_results};
use crate::error::{AgentError, Result};
use crate::events::TurnEvent;
use crate::factory::AdapterFactory;
use crate::llm::{ChatModel, ChatRequest, Message, ModelTurn, ToolCall, ToolDefinition};
use crate::postprocess::PostProcessor;
use crate::prompt::{PromptContext, ViewerFile, build_system_prompt};
use crate::resolver::UriResolver;

/// Identical consecutive calls allowed before the next one is blocked.
const LOOP_BLOCK_THRESHOLD: u32 = 3;

/// Default limit for `search_tool` results.
const SEARCH_DEFAULT_LIMIT: usize = 5;

/// Assistant text must exceed this length for memory extraction to run.
const MEMORY_EXTRACTION_MIN_CHARS: usize = 100;

/// Persisted messages replayed when a request carries no history.
const HISTORY_WINDOW: u32 = 20;

static NUMBERED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+\.\s+([A-Za-z0-9_][A-Za-z0-9_.-]*)").expect("static regex")
});

// ---------------------------------------------------------------------------
// Turn input / output
// ---------------------------------------------------------------------------

/// One inbound chat turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub viewer_file: Option<ViewerFileRequest>,
}

/// Viewer-file block as it arrives on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerFileRequest {
    pub cache_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
}

/// What a completed turn produced (for the job runner and persistence).
#[derive(Debug, Clone, Default)]
pub struct TurnSummary {
    pub assistant_text: String,
    pub iterations: u32,
    pub tool_calls_executed: u32,
}

/// Tunables for the turn loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for a single adapter call.
    pub call_timeout: Duration,
    /// Hard deadline for the memory-extraction pass.
    pub memory_extraction_timeout: Duration,
    /// Sampling temperature for the main loop.
    pub temperature: Option<f32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            memory_extraction_timeout: Duration::from_secs(12),
            temperature: Some(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The chat turn engine. One instance per process, shared across turns.
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    factory: Arc<AdapterFactory>,
    catalog: ToolCatalog,
    resolver: Arc<UriResolver>,
    postprocessor: Arc<PostProcessor>,
    settings: SettingsStore,
    roles: RoleStore,
    messages: MessageStore,
    tokens: Arc<TokenService>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ChatModel>,
        factory: Arc<AdapterFactory>,
        catalog: ToolCatalog,
        resolver: Arc<UriResolver>,
        postprocessor: Arc<PostProcessor>,
        settings: SettingsStore,
        roles: RoleStore,
        messages: MessageStore,
        tokens: Arc<TokenService>,
        config: OrchestratorConfig,
    ) -> Self {
        // Hidden providers never surface in tool search.
        let hidden = factory
            .registry()
            .descriptors()
            .into_iter()
            .filter(|d| d.visibility == tandem_adapters::Visibility::Hidden)
            .map(|d| d.key);
        catalog.set_hidden_providers(hidden);

        Self {
            model,
            factory,
            catalog,
            resolver,
            postprocessor,
            settings,
            roles,
            messages,
            tokens,
            config,
        }
    }

    /// Run one chat turn, streaming events into `tx`. Always ends the
    /// stream with `[DONE]`; fatal errors additionally emit an error frame
    /// and propagate.
    #[instrument(skip(self, request, tx), fields(user = user_id))]
    pub async fn run_turn(
        &self,
        user_id: &str,
        request: ChatTurnRequest,
        tx: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnSummary> {
        let result = self.turn_inner(user_id, &request, &tx).await;
        match &result {
            Ok(summary) => {
                debug!(
                    iterations = summary.iterations,
                    tool_calls = summary.tool_calls_executed,
                    "turn complete"
                );
            }
            Err(e) => {
                warn!(error = %e, "turn aborted");
                let _ = tx
                    .send(TurnEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        let _ = tx.send(TurnEvent::Done).await;
        result
    }

    async fn turn_inner(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnSummary> {
        let max_iterations = self.settings.max_iterations().await?;
        let bootstrap_mode = self.settings.bootstrap_mode().await?;
        let stream_delay = Duration::from_millis(self.settings.stream_delay_ms().await?);

        // Role context; loading the role also brings up its memory adapter.
        let role = match &request.role_id {
            Some(role_id) => match self.roles.get(role_id).await {
                Ok(role) => Some(role),
                Err(StoreError::NotFound { .. }) => {
                    return Err(AgentError::Validation {
                        reason: format!("unknown role `{role_id}`"),
                    });
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        if let Some(role) = &role {
            self.factory
                .get_adapter(user_id, "memory", Some(&role.id))
                .await?;
        }

        // Invariant: the catalog is rebuilt before the loop starts.
        self.catalog.refresh(&self.factory.live_adapters()).await?;

        let accounts = self.tokens.connected_accounts(user_id).await?;
        let search_discovery = bootstrap_mode == BootstrapMode::Search;
        let system_prompt = build_system_prompt(&PromptContext {
            timezone: request.timezone.clone(),
            locale: request.locale.clone(),
            role: role.clone(),
            accounts,
            viewer_file: request.viewer_file.as_ref().map(|v| ViewerFile {
                cache_id: v.cache_id.clone(),
                file_name: v.file_name.clone(),
                file_type: v.file_type.clone(),
            }),
            search_discovery,
        });

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Message::system(system_prompt));
        if request.messages.is_empty() {
            // Clients that keep no local history get the persisted tail.
            let history = self
                .messages
                .recent(user_id, request.role_id.as_deref(), HISTORY_WINDOW)
                .await?;
            messages.extend(history.into_iter().map(|stored| Message {
                role: match stored.author {
                    Author::User => crate::llm::Role::User,
                    Author::Assistant => crate::llm::Role::Assistant,
                    Author::System => crate::llm::Role::System,
                },
                content: stored.content,
                tool_calls: Vec::new(),
            }));
        } else {
            messages.extend(request.messages.iter().cloned());
        }

        let mut visible_tools = self.bootstrap_tools(bootstrap_mode, role.is_some());
        let model_name = role
            .as_ref()
            .and_then(|r| r.model.clone())
            .unwrap_or_default();

        let mut summary = TurnSummary::default();
        let mut expanded = false;
        let mut last_repeat_key: Option<(String, String)> = None;
        let mut repeat_count = 0u32;

        // ── the loop ─────────────────────────────────────────────────
        loop {
            if summary.iterations >= max_iterations {
                info!(max_iterations, "iteration cap reached");
                send(tx, TurnEvent::Info {
                    message: "Tool execution limit reached".into(),
                })
                .await?;
                break;
            }

            let turn = self
                .stream_model_turn(&model_name, &messages, &visible_tools, tx, stream_delay)
                .await?;
            summary.iterations += 1;

            if turn.tool_calls.is_empty() {
                messages.push(Message::assistant(&turn.text));
                summary.assistant_text = turn.text;
                break;
            }

            messages.push(Message::assistant_with_calls(
                &turn.text,
                turn.tool_calls.clone(),
            ));
            if !turn.text.is_empty() {
                summary.assistant_text = turn.text.clone();
            }

            for call in &turn.tool_calls {
                send(tx, TurnEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await?;

                // Loop detection over consecutive identical calls.
                let key = call.repeat_key();
                if last_repeat_key.as_ref() == Some(&key) {
                    repeat_count += 1;
                } else {
                    last_repeat_key = Some(key);
                    repeat_count = 1;
                }
                if repeat_count >= LOOP_BLOCK_THRESHOLD {
                    warn!(tool = %call.name, "repeated call blocked");
                    let blocked_note = format!(
                        "Call to {} blocked: identical call repeated {LOOP_BLOCK_THRESHOLD} times. \
                         Try a different approach.",
                        call.name
                    );
                    messages.push(Message::tool_result(&call.name, &blocked_note));
                    let server_id = self
                        .catalog
                        .find_server(&call.name)
                        .unwrap_or_else(|| "catalog".into());
                    send(tx, TurnEvent::ToolResult {
                        tool_name: call.name.clone(),
                        server_id,
                        result: blocked_note,
                        metadata: None,
                        accounts: Vec::new(),
                        blocked: true,
                    })
                    .await?;
                    continue;
                }

                // The discovery meta-tool is handled by the orchestrator
                // itself.
                if call.name == SEARCH_TOOL_NAME {
                    let outcome = self.handle_search_tool(call, &mut visible_tools, &mut expanded);
                    messages.push(Message::tool_result(&call.name, outcome.render()));
                    send(tx, TurnEvent::ToolResult {
                        tool_name: call.name.clone(),
                        server_id: "catalog".into(),
                        result: outcome.render().to_string(),
                        metadata: outcome.metadata.clone(),
                        accounts: Vec::new(),
                        blocked: false,
                    })
                    .await?;
                    summary.tool_calls_executed += 1;
                    continue;
                }

                let (server_id, outcome) = self
                    .execute_tool_call(user_id, role.as_ref().map(|r| r.id.as_str()), call)
                    .await;
                messages.push(Message::tool_result(&call.name, outcome.render()));
                send(tx, TurnEvent::ToolResult {
                    tool_name: call.name.clone(),
                    server_id,
                    result: outcome.render().to_string(),
                    metadata: outcome.metadata.clone(),
                    accounts: outcome.accounts.clone(),
                    blocked: false,
                })
                .await?;
                summary.tool_calls_executed += 1;
            }
        }

        // Persist the exchange.
        self.persist_exchange(user_id, request, &summary).await;

        // Bounded memory extraction, then the terminal frame (sent by the
        // caller wrapper).
        self.memory_extraction(user_id, role.as_ref().map(|r| r.id.as_str()), request, &summary, tx)
            .await?;

        Ok(summary)
    }

    // ── model streaming ──────────────────────────────────────────────

    /// One model round-trip: emoji-stripped text chunks are paced onto the
    /// event channel while the turn accumulates.
    async fn stream_model_turn(
        &self,
        model_name: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        tx: &mpsc::Sender<TurnEvent>,
        stream_delay: Duration,
    ) -> Result<ModelTurn> {
        let request = ChatRequest {
            model: model_name.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            temperature: self.config.temperature,
            max_tokens: None,
        };

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        let event_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let sanitized = strip_emoji(&chunk);
                if sanitized.is_empty() {
                    continue;
                }
                if event_tx
                    .send(TurnEvent::Content { text: sanitized })
                    .await
                    .is_err()
                {
                    // Client went away; drain silently.
                    continue;
                }
                // Pacing between chunks: observable backpressure, not
                // load-bearing for correctness.
                tokio::time::sleep(stream_delay).await;
            }
        });

        let mut on_text = move |delta: &str| {
            let _ = chunk_tx.send(delta.to_string());
        };
        let result = self.model.stream_turn(&request, &mut on_text).await;
        drop(on_text);

        // All content chunks for this iteration flush before any
        // tool_result that follows.
        let _ = forwarder.await;
        result
    }

    // ── tool dispatch ────────────────────────────────────────────────

    /// Execute one (non-meta) tool call end to end. Failures the model can
    /// react to come back as error outcomes; nothing here aborts the turn.
    async fn execute_tool_call(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        call: &ToolCall,
    ) -> (String, ToolOutcome) {
        let Some(server_id) = self.catalog.find_server(&call.name) else {
            return (
                "catalog".into(),
                ToolOutcome::error(format!("Unknown tool: {}", call.name)),
            );
        };

        // Schema validation before anything touches an adapter.
        if let Some(descriptor) = self.catalog.tool(&call.name)
            && let Err(e) = validate_arguments(&descriptor, &call.arguments)
        {
            return (server_id, ToolOutcome::error(e.to_string()));
        }

        let arguments = self
            .resolver
            .resolve_arguments(&call.arguments, user_id)
            .await;

        let adapter = match self.factory.get_adapter(user_id, &server_id, role_id).await {
            Ok(adapter) => adapter,
            Err(AgentError::AuthRequired { provider }) => {
                return (
                    server_id,
                    ToolOutcome::error(format!(
                        "Authentication required for provider `{provider}`. Ask the user to connect the account."
                    ))
                    .with_metadata(json!({ "authRequired": true, "provider": provider })),
                );
            }
            Err(e) => return (server_id, ToolOutcome::error(e.to_string())),
        };

        // First attempt, with the per-call deadline.
        let outcome = match tokio::time::timeout(
            self.config.call_timeout,
            adapter.call_tool(&call.name, arguments.clone()),
        )
        .await
        {
            Err(_) => {
                return (
                    server_id,
                    ToolOutcome::error(format!(
                        "Tool {} timed out after {:?}",
                        call.name, self.config.call_timeout
                    )),
                );
            }
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) if e.is_transient() => {
                // One reconnect-and-retry for transport failures.
                debug!(tool = %call.name, error = %e, "transient failure; reconnecting");
                match adapter.reconnect().await {
                    Ok(()) => match tokio::time::timeout(
                        self.config.call_timeout,
                        adapter.call_tool(&call.name, arguments),
                    )
                    .await
                    {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(retry_err)) => Err(retry_err.into_fatal()),
                        Err(_) => {
                            return (
                                server_id,
                                ToolOutcome::error(format!(
                                    "Tool {} timed out after {:?}",
                                    call.name, self.config.call_timeout
                                )),
                            );
                        }
                    },
                    Err(reconnect_err) => Err(reconnect_err.into_fatal()),
                }
            }
            Ok(Err(e)) => Err(e),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::error(e.to_string()),
        };

        let processed = self
            .postprocessor
            .process(&call.name, &server_id, &call.arguments, outcome)
            .await;
        (server_id, processed)
    }

    // ── discovery ────────────────────────────────────────────────────

    /// The bootstrap toolset for the configured mode.
    fn bootstrap_tools(&self, mode: BootstrapMode, has_role: bool) -> Vec<ToolDefinition> {
        match mode {
            BootstrapMode::Direct => self
                .catalog
                .visible_tools()
                .iter()
                .map(ToolDefinition::from)
                .collect(),
            BootstrapMode::Search => {
                let mut tools = vec![search_tool_definition()];
                if has_role {
                    tools.extend(
                        memory_tool_descriptors()
                            .iter()
                            .filter(|d| MEMORY_READ_TOOLS.contains(&d.name.as_str()))
                            .map(ToolDefinition::from),
                    );
                }
                tools
            }
        }
    }

    /// Run `search_tool` and, the first time per turn, expand the visible
    /// toolset with the top matches.
    fn handle_search_tool(
        &self,
        call: &ToolCall,
        visible_tools: &mut Vec<ToolDefinition>,
        expanded: &mut bool,
    ) -> ToolOutcome {
        let query = call
            .arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or("");
        let limit = call
            .arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(SEARCH_DEFAULT_LIMIT);

        let hits = self.catalog.search(query, limit);
        let (text, metadata) = render_search_results(query, &hits);

        if !*expanded {
            let names = extract_tool_names(&metadata, &text);
            let mut added = 0;
            for name in names {
                if visible_tools.iter().any(|t| t.name == name) {
                    continue;
                }
                if let Some(descriptor) = self.catalog.tool(&name) {
                    visible_tools.push(ToolDefinition::from(&descriptor));
                    added += 1;
                }
            }
            if added > 0 {
                *expanded = true;
                info!(added, "tool set expanded from search results");
            }
        }

        ToolOutcome::text(text).with_metadata(metadata)
    }

    // ── memory extraction ────────────────────────────────────────────

    /// Bounded second model pass that persists 1–5 notable facts from the
    /// exchange. Never fails the turn; timeouts report `count: 0`.
    async fn memory_extraction(
        &self,
        user_id: &str,
        role_id: Option<&str>,
        request: &ChatTurnRequest,
        summary: &TurnSummary,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<()> {
        send(tx, TurnEvent::MemoryTask {
            status: "started".into(),
            count: None,
        })
        .await?;

        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            .map(|m| m.content.clone());

        let eligible = role_id.is_some()
            && summary.assistant_text.chars().count() > MEMORY_EXTRACTION_MIN_CHARS
            && user_text.is_some();

        let count = if eligible {
            let role_id = role_id.expect("eligible implies role");
            match tokio::time::timeout(
                self.config.memory_extraction_timeout,
                self.run_extraction_pass(user_id, role_id, &user_text.unwrap_or_default(), &summary.assistant_text),
            )
            .await
            {
                Ok(Ok(count)) => count,
                Ok(Err(e)) => {
                    warn!(error = %e, "memory extraction failed");
                    0
                }
                Err(_) => {
                    debug!("memory extraction timed out");
                    0
                }
            }
        } else {
            0
        };

        send(tx, TurnEvent::MemoryTask {
            status: "completed".into(),
            count: Some(count),
        })
        .await?;
        Ok(())
    }

    async fn run_extraction_pass(
        &self,
        user_id: &str,
        role_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<u32> {
        let tools: Vec<ToolDefinition> = memory_tool_descriptors()
            .iter()
            .filter(|d| MEMORY_WRITE_TOOLS.contains(&d.name.as_str()))
            .map(ToolDefinition::from)
            .collect();

        let request = ChatRequest {
            model: String::new(),
            messages: vec![
                Message::system(
                    "Extract 1-5 notable, durable facts about the user or their \
                     world from this exchange and store them with the memory \
                     tools. Skip pleasantries and one-off details. If nothing \
                     is worth remembering, do nothing.",
                ),
                Message::user(format!(
                    "User said:\n{user_text}\n\nAssistant replied:\n{assistant_text}"
                )),
            ],
            tools,
            temperature: Some(0.0),
            max_tokens: Some(1024),
        };

        let mut sink = |_: &str| {};
        let turn = self.model.stream_turn(&request, &mut sink).await?;

        let adapter = self
            .factory
            .get_adapter(user_id, "memory", Some(role_id))
            .await?;
        let mut stored = 0u32;
        for call in &turn.tool_calls {
            if !MEMORY_WRITE_TOOLS.contains(&call.name.as_str()) {
                continue;
            }
            match adapter.call_tool(&call.name, call.arguments.clone()).await {
                Ok(outcome) if !outcome.is_error() => stored += 1,
                Ok(outcome) => warn!(tool = %call.name, result = %outcome.render(), "memory write rejected"),
                Err(e) => warn!(tool = %call.name, error = %e, "memory write failed"),
            }
        }
        Ok(stored)
    }

    // ── persistence ──────────────────────────────────────────────────

    /// Append the user turn and the assistant reply to durable history.
    async fn persist_exchange(
        &self,
        user_id: &str,
        request: &ChatTurnRequest,
        summary: &TurnSummary,
    ) {
        let role_id = request.role_id.as_deref();
        if let Some(user_msg) = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            && let Err(e) = self
                .messages
                .append(user_id, role_id, Author::User, &user_msg.content)
                .await
        {
            warn!(error = %e, "failed to persist user message");
        }
        if !summary.assistant_text.is_empty()
            && let Err(e) = self
                .messages
                .append(user_id, role_id, Author::Assistant, &summary.assistant_text)
                .await
        {
            warn!(error = %e, "failed to persist assistant message");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Send an event, mapping a closed channel (client disconnect) to an
/// internal error that aborts the turn quietly.
async fn send(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| AgentError::Internal("event stream closed by client".into()))
}

/// The definition of the discovery meta-tool.
pub fn search_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOL_NAME.into(),
        description: "Search for available tools by describing what you need to do. \
                      Matching tools become available for your next step."
            .into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you are trying to do, in a few words"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)",
                    "minimum": 1,
                    "maximum": 20
                }
            },
            "required": ["query"]
        }),
    }
}

/// Tool names from a `search_tool` outcome: the structured refs, with the
/// numbered-line regex as fallback for outcomes that lost their metadata.
fn extract_tool_names(metadata: &Value, text: &str) -> Vec<String> {
    let from_refs: Vec<String> = metadata
        .get("tools")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if !from_refs.is_empty() {
        return from_refs;
    }

    NUMBERED_LINE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Remove emoji and related pictographs from a chunk of model text.
fn strip_emoji(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            let cp = c as u32;
            !(matches!(cp,
                0x1F000..=0x1FAFF      // pictographs, emoticons, symbols
                | 0x2600..=0x27BF      // misc symbols + dingbats
                | 0x2B00..=0x2BFF      // stars and similar
                | 0xFE00..=0xFE0F      // variation selectors
                | 0x200D               // zero-width joiner
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_emoji_removes_pictographs() {
        assert_eq!(strip_emoji("done \u{2705} and \u{1F680}!"), "done  and !");
        assert_eq!(strip_emoji("plain text"), "plain text");
    }

    #[test]
    fn strip_emoji_keeps_unicode_text() {
        assert_eq!(strip_emoji("naïve — résumé 中文"), "naïve — résumé 中文");
    }

    #[test]
    fn extract_names_prefers_structured_refs() {
        let metadata = json!({"tools": [{"name": "a_tool"}, {"name": "b_tool"}]});
        let names = extract_tool_names(&metadata, "1. ignored_tool — desc\n");
        assert_eq!(names, vec!["a_tool", "b_tool"]);
    }

    #[test]
    fn extract_names_falls_back_to_numbered_lines() {
        let text = "Found 2 tools matching \"x\":\n\
                    1. gdrive_list_files (gdrive, score 0.80) — List files\n\
                    2. gmail_search (gmail, score 0.40) — Search mail\n";
        let names = extract_tool_names(&json!({}), text);
        assert_eq!(names, vec!["gdrive_list_files", "gmail_search"]);
    }

    #[test]
    fn search_tool_definition_shape() {
        let def = search_tool_definition();
        assert_eq!(def.name, SEARCH_TOOL_NAME);
        assert_eq!(def.input_schema["required"][0], "query");
    }
}
