//! Agent runtime for Tandem.
//!
//! One chat turn flows through here: the [`orchestrator`] streams model
//! round-trips, routes tool calls through the [`factory`]'s cached
//! adapters, discovers tools via the [`catalog`], rewrites argument URIs
//! with the [`resolver`], reshapes selected results in [`postprocess`],
//! and emits ordered [`events`] to the transport.

pub mod catalog;
pub mod error;
pub mod events;
pub mod factory;
pub mod llm;
pub mod orchestrator;
pub mod postprocess;
pub mod prompt;
pub mod resolver;

pub use catalog::{SEARCH_TOOL_NAME, SearchHit, ToolCatalog, render_search_results};
pub use error::{AgentError, Result};
pub use events::TurnEvent;
pub use factory::{AdapterFactory, FactoryConfig};
pub use llm::{ChatModel, ChatRequest, HttpChatModel, Message, ModelConfig, ModelTurn, Role, TextSink, ToolCall, ToolDefinition};
pub use orchestrator::{
    ChatTurnRequest, Orchestrator, OrchestratorConfig, TurnSummary, ViewerFileRequest,
    search_tool_definition,
};
pub use postprocess::PostProcessor;
pub use prompt::{PromptContext, ViewerFile, build_system_prompt};
pub use resolver::{DriveFetcher, UriResolver, drive_file_id};
