//! Host a tool-calling LLM agent behind a plain request handler.
//!
//! The crate provides:
//! - A tool interface with declared parameter schemas (`Tool`, `ToolSpec`, `ToolRegistry`).
//! - A `ToolInvoker` that turns every tool failure into a `ToolResult`.
//! - A `TurnHandler` that loops between the model backend and tools, bounded by
//!   a round-trip limit.
//! - An `AgentHost` that drives one turn per inbound request, with an optional
//!   axum HTTP surface (`server` feature).

mod agent;
mod config;
mod credential;
mod error;
mod host;
mod invoker;
mod llm;
mod message;
mod metrics;
#[cfg(feature = "server")]
mod server;
mod telemetry;
mod tool;
pub mod tools;
mod turn;

pub use agent::{Agent, ConversationAgent};
pub use config::{
    AgentConfig, AppConfig, CredentialConfig, CredentialScheme, CredentialSource, ModelConfig,
    ModelProvider, ServerConfig, TelemetryConfig,
};
pub use credential::{
    ApiKeyCredential, BearerTokenCredential, Credential, CredentialProvider, EnvironmentCredential,
};
pub use error::{AgentHostError, Result};
pub use host::{
    failure_reply, initial_history, AgentHost, AgentRequest, AgentResponse, AgentSource,
    ResponseError, ResponseStatus,
};
pub use invoker::{ToolInvoker, DEFAULT_TOOL_TIMEOUT, TIMEOUT_OUTPUT};
pub use llm::{
    model_from_config, AttemptError, AzureOpenAiClient, LanguageModel, ModelCompletion,
    OpenAiClient, RetryPolicy, StubModel,
};
pub use message::{Message, Role, ToolCall, ToolResult, ToolStatus};
pub use metrics::{MetricsSummary, MetricsTracker, TurnGuard, TurnReport};
#[cfg(feature = "server")]
pub use server::AgentServer;
pub use telemetry::{env_filter, init_tracing};
pub use tool::{FnTool, ParameterSpec, ParameterType, Tool, ToolDescription, ToolRegistry, ToolSpec};
pub use turn::{TurnHandler, TurnOutcome, TurnSettings, TurnState};
