//! End-to-end turn scenarios against a scripted model.
//!
//! These drive the full orchestrator with in-memory stores, in-process
//! adapters, and a ChatModel implementation that replays a fixed sequence
//! of turns, checking the streamed event order and the tool-calling
//! behavior: bootstrap-only turns, two-phase discovery, loop blocking, the
//! iteration cap, and the memory-extraction post-step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use tandem_adapters::{
    Adapter, AdapterError, AuthRequirement, InProcessAdapter, MemoryAdapter, ProviderDescriptor,
    ProviderRegistry, ProviderScope, ToolDescriptor, Transport, Visibility,
};
use tandem_agent::{
    AdapterFactory, ChatModel, ChatRequest, ChatTurnRequest, FactoryConfig, Message, ModelTurn,
    Orchestrator, OrchestratorConfig, PostProcessor, TextSink, ToolCall, TurnEvent, UriResolver,
};
use tandem_auth::{RefreshedToken, TokenRefresher, TokenService};
use tandem_store::{
    Database, FileCache, MemoryGraph, MessageStore, RoleStore, SettingsStore, TokenStore,
    UserStore,
};

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// Replays a fixed sequence of model turns and records every request.
struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_turn(
        &self,
        request: &ChatRequest,
        on_text: TextSink<'_>,
    ) -> tandem_agent::Result<ModelTurn> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        // Stream the text in two chunks to exercise accumulation.
        let mid = turn.text.len() / 2;
        if turn.text.is_char_boundary(mid) && mid > 0 {
            let (a, b) = turn.text.split_at(mid);
            on_text(a);
            on_text(b);
        } else if !turn.text.is_empty() {
            on_text(&turn.text);
        }
        Ok(turn)
    }
}

fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: text.into(),
        tool_calls: Vec::new(),
        stop_reason: Some("end_turn".into()),
    }
}

fn call_turn(id: &str, name: &str, arguments: Value) -> ModelTurn {
    ModelTurn {
        text: String::new(),
        tool_calls: vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }],
        stop_reason: Some("tool_use".into()),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(
        &self,
        provider: &str,
        _refresh_token: &str,
    ) -> tandem_auth::Result<RefreshedToken> {
        Err(tandem_auth::AuthError::RefreshFailed {
            provider: provider.to_string(),
            reason: "no refresh in tests".into(),
        })
    }
}

struct Harness {
    orchestrator: Orchestrator,
    factory: Arc<AdapterFactory>,
    settings: SettingsStore,
    roles: RoleStore,
    _dir: tempfile::TempDir,
}

fn tool(name: &str, description: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: description.into(),
        input_schema: json!({
            "type": "object",
            "properties": {"symbol": {"type": "string"}, "query": {"type": "string"}}
        }),
        provider_key: String::new(),
        requires_detailed_schema: false,
    }
}

fn demo_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    registry.register_in_process(
        ProviderDescriptor {
            key: "memory".into(),
            display_name: "Memory".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::Hidden,
            scope: ProviderScope::PerRole,
            credentials_file: None,
        },
        Arc::new(|ctx| {
            Box::pin(async move {
                let db_path = ctx.token_data["db_path"]
                    .as_str()
                    .ok_or_else(|| AdapterError::Fatal {
                        provider: "memory".into(),
                        reason: "missing db_path".into(),
                    })?
                    .to_string();
                let graph = Arc::new(MemoryGraph::open(&db_path).await?);
                let role = ctx.role_id.unwrap_or_default();
                Ok(Arc::new(MemoryAdapter::new(role, graph)) as Arc<dyn Adapter>)
            })
        }),
    );

    registry.register_in_process(
        ProviderDescriptor {
            key: "alpha_vantage".into(),
            display_name: "Alpha Vantage".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::Global,
            credentials_file: None,
        },
        Arc::new(|_ctx| {
            Box::pin(async move {
                let adapter = InProcessAdapter::builder("alpha_vantage")
                    .tool(
                        tool("globalQuote", "Get the latest stock quote for a symbol"),
                        Box::new(|args| {
                            Box::pin(async move {
                                Ok(json!({
                                    "type": "text",
                                    "text": format!("quote for {}: 123.45", args["symbol"])
                                }))
                            })
                        }),
                    )
                    .build();
                Ok(Arc::new(adapter) as Arc<dyn Adapter>)
            })
        }),
    );

    registry.register_in_process(
        ProviderDescriptor {
            key: "gdrive".into(),
            display_name: "Google Drive".into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth: AuthRequirement::None,
            visibility: Visibility::UserVisible,
            scope: ProviderScope::Global,
            credentials_file: None,
        },
        Arc::new(|_ctx| {
            Box::pin(async move {
                let adapter = InProcessAdapter::builder("gdrive")
                    .tool(
                        tool("gdrive_list_files", "List files in a Google Drive folder"),
                        Box::new(|_| Box::pin(async { Ok(json!("file-a, file-b")) })),
                    )
                    .build();
                Ok(Arc::new(adapter) as Arc<dyn Adapter>)
            })
        }),
    );

    registry
}

async fn harness(model: Arc<dyn ChatModel>) -> Harness {
    let db = Database::metadata_in_memory().await.unwrap();
    UserStore::new(db.clone()).ensure("u1", "u1").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(dir.path().join("cache")).unwrap();
    let memory_root = dir.path().join("memory");
    std::fs::create_dir_all(&memory_root).unwrap();

    let tokens = Arc::new(TokenService::new(
        TokenStore::new(db.clone()),
        Box::new(NoRefresh),
    ));
    let factory = Arc::new(AdapterFactory::new(
        demo_registry(),
        Arc::clone(&tokens),
        tandem_store::ProviderConfigStore::new(db.clone()),
        FactoryConfig {
            work_root: dir.path().join("work"),
            memory_root,
            google: None,
        },
    ));

    let settings = SettingsStore::new(db.clone());
    let roles = RoleStore::new(db.clone());

    let orchestrator = Orchestrator::new(
        model,
        Arc::clone(&factory),
        tandem_agent::ToolCatalog::new(),
        Arc::new(UriResolver::new(cache.clone(), None)),
        Arc::new(PostProcessor::new(cache)),
        settings.clone(),
        roles.clone(),
        MessageStore::new(db),
        tokens,
        OrchestratorConfig::default(),
    );

    Harness {
        orchestrator,
        factory,
        settings,
        roles,
        _dir: dir,
    }
}

/// Run a turn and collect the full event stream.
async fn run(harness: &Harness, request: ChatTurnRequest) -> Vec<TurnEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    let result = harness.orchestrator.run_turn("u1", request, tx).await;
    assert!(result.is_ok(), "turn failed: {result:?}");

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn user_request(text: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        messages: vec![Message::user(text)],
        ..Default::default()
    }
}

fn content_text(events: &[TurnEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Content { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_results(events: &[TurnEvent]) -> Vec<&TurnEvent> {
    events
        .iter()
        .filter(|e| matches!(e, TurnEvent::ToolResult { .. }))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bootstrap_turn_without_tools() {
    let model = ScriptedModel::new(vec![text_turn("Hello! How can I help you today?")]);
    let harness = harness(model.clone()).await;

    let events = run(&harness, user_request("Hello")).await;

    assert!(!content_text(&events).is_empty());
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TurnEvent::ToolCall { .. }))
    );

    // memory_task frames bracket the end, and the count property exists.
    let completed = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::MemoryTask { status, count } if status == "completed" => Some(*count),
            _ => None,
        })
        .expect("memory_task completed event");
    assert_eq!(completed, Some(0));

    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn two_phase_discovery_expands_the_toolset() {
    let model = ScriptedModel::new(vec![
        call_turn("tc1", "search_tool", json!({"query": "list files in drive"})),
        text_turn("Found your files."),
    ]);
    let harness = harness(model.clone()).await;

    // Pre-warm the provider so the catalog sees its tools.
    harness
        .factory
        .get_adapter("u1", "gdrive", None)
        .await
        .unwrap();

    let events = run(&harness, user_request("list files in drive")).await;

    // Exactly one search_tool result, matching the contract text.
    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    let TurnEvent::ToolResult {
        result, server_id, ..
    } = results[0]
    else {
        unreachable!()
    };
    assert!(result.starts_with("Found "), "got: {result}");
    assert!(
        regex::Regex::new(r"^Found \d+ tools")
            .unwrap()
            .is_match(result)
    );
    assert_eq!(server_id, "catalog");

    // The second model request sees search_tool plus the discovered tools.
    let requests = model.recorded_requests();
    assert!(requests.len() >= 2);
    let second_tools: Vec<&str> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
    assert!(second_tools.contains(&"search_tool"));
    assert!(second_tools.contains(&"gdrive_list_files"));

    // First request exposed only the bootstrap set.
    let first_tools: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(first_tools, vec!["search_tool"]);
}

#[tokio::test]
async fn third_identical_call_is_blocked() {
    let args = json!({"symbol": "AAPL"});
    let model = ScriptedModel::new(vec![
        call_turn("tc1", "globalQuote", args.clone()),
        call_turn("tc2", "globalQuote", args.clone()),
        call_turn("tc3", "globalQuote", args.clone()),
        text_turn("AAPL trades at 123.45."),
    ]);
    let harness = harness(model).await;
    harness
        .factory
        .get_adapter("u1", "alpha_vantage", None)
        .await
        .unwrap();

    let events = run(&harness, user_request("quote AAPL")).await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 3);
    for (index, event) in results.iter().enumerate() {
        let TurnEvent::ToolResult {
            blocked, result, ..
        } = event
        else {
            unreachable!()
        };
        if index < 2 {
            assert!(!blocked, "call {index} should have executed");
            assert!(result.contains("123.45"));
        } else {
            assert!(blocked, "third identical call must be blocked");
        }
    }
    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn varying_arguments_do_not_trip_the_loop_detector() {
    let model = ScriptedModel::new(vec![
        call_turn("tc1", "globalQuote", json!({"symbol": "AAPL"})),
        call_turn("tc2", "globalQuote", json!({"symbol": "MSFT"})),
        call_turn("tc3", "globalQuote", json!({"symbol": "AAPL"})),
        text_turn("done"),
    ]);
    let harness = harness(model).await;
    harness
        .factory
        .get_adapter("u1", "alpha_vantage", None)
        .await
        .unwrap();

    let events = run(&harness, user_request("quotes")).await;
    assert!(tool_results(&events).iter().all(|e| {
        let TurnEvent::ToolResult { blocked, .. } = e else {
            unreachable!()
        };
        !blocked
    }));
}

#[tokio::test]
async fn iteration_cap_emits_info_event() {
    // Model never stops calling tools (distinct args dodge the loop block).
    let turns: Vec<ModelTurn> = (0..20)
        .map(|i| call_turn(&format!("tc{i}"), "globalQuote", json!({"symbol": format!("S{i}")})))
        .collect();
    let model = ScriptedModel::new(turns);
    let harness = harness(model.clone()).await;
    harness
        .factory
        .get_adapter("u1", "alpha_vantage", None)
        .await
        .unwrap();
    harness
        .settings
        .set("max_iterations", &json!(3))
        .await
        .unwrap();

    let events = run(&harness, user_request("spin")).await;

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::Info { message } if message == "Tool execution limit reached"
    )));
    // Round-trips are bounded by the cap.
    assert!(model.recorded_requests().len() <= 4);
    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn every_tool_call_gets_a_result_before_the_next_content() {
    let model = ScriptedModel::new(vec![
        call_turn("tc1", "globalQuote", json!({"symbol": "AAPL"})),
        text_turn("All done."),
    ]);
    let harness = harness(model).await;
    harness
        .factory
        .get_adapter("u1", "alpha_vantage", None)
        .await
        .unwrap();

    let events = run(&harness, user_request("quote")).await;

    let mut pending_calls = 0i32;
    for event in &events {
        match event {
            TurnEvent::ToolCall { .. } => pending_calls += 1,
            TurnEvent::ToolResult { .. } => pending_calls -= 1,
            TurnEvent::Content { .. } | TurnEvent::Done => {
                assert_eq!(pending_calls, 0, "tool_call without result before {event:?}");
            }
            _ => {}
        }
    }
    assert_eq!(pending_calls, 0);
}

#[tokio::test]
async fn unknown_tool_becomes_error_result() {
    let model = ScriptedModel::new(vec![
        call_turn("tc1", "no_such_tool", json!({})),
        text_turn("sorry"),
    ]);
    let harness = harness(model).await;

    let events = run(&harness, user_request("try")).await;
    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    let TurnEvent::ToolResult { result, .. } = results[0] else {
        unreachable!()
    };
    assert!(result.contains("Unknown tool"));
    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn memory_extraction_stores_facts_for_roles() {
    let long_reply = "Your portfolio review is finished. I looked at all twelve holdings, \
                      compared them against the benchmarks you set last quarter, and the \
                      detailed breakdown is ready whenever you want to walk through it.";
    let model = ScriptedModel::new(vec![
        text_turn(long_reply),
        // Extraction pass.
        call_turn(
            "tc-mem",
            "memory_create_entities",
            json!({"entities": [{"name": "Portfolio", "entityType": "asset",
                                  "observations": ["reviewed twelve holdings"]}]}),
        ),
    ]);
    let harness = harness(model).await;
    let role = harness
        .roles
        .create("u1", "Advisor", "tracks investments", "", None)
        .await
        .unwrap();

    let mut request = user_request("How is my portfolio doing?");
    request.role_id = Some(role.id.clone());
    let events = run(&harness, request).await;

    let completed = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::MemoryTask { status, count } if status == "completed" => Some(*count),
            _ => None,
        })
        .expect("memory_task completed");
    assert_eq!(completed, Some(1));

    // The fact landed in the role's graph.
    let adapter = harness
        .factory
        .get_adapter("u1", "memory", Some(&role.id))
        .await
        .unwrap();
    let outcome = adapter
        .call_tool("memory_read_graph", json!({}))
        .await
        .unwrap();
    assert!(outcome.render().contains("Portfolio"));
}

#[tokio::test]
async fn short_replies_skip_memory_extraction() {
    let model = ScriptedModel::new(vec![text_turn("Sure.")]);
    let harness = harness(model.clone()).await;
    let role = harness
        .roles
        .create("u1", "Helper", "", "", None)
        .await
        .unwrap();

    let mut request = user_request("thanks");
    request.role_id = Some(role.id);
    let events = run(&harness, request).await;

    let completed = events.iter().find_map(|e| match e {
        TurnEvent::MemoryTask { status, count } if status == "completed" => Some(*count),
        _ => None,
    });
    assert_eq!(completed, Some(Some(0)));
    // Only the main turn hit the model; no extraction pass ran.
    assert_eq!(model.recorded_requests().len(), 1);
}
