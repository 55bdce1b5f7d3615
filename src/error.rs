use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentHostError>;

#[derive(Debug, Error)]
pub enum AgentHostError {
    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("invalid arguments for tool `{tool}`: {reason}")]
    ToolArgument { tool: String, reason: String },

    #[error("tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool `{tool}` timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("tool loop limit of {limit} round trips exceeded")]
    ToolLoopLimitExceeded { limit: usize },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl AgentHostError {
    /// Stable label used in logs and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::DuplicateTool(_) => "duplicate_tool",
            Self::ToolArgument { .. } => "tool_argument",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolLoopLimitExceeded { .. } => "tool_loop_limit_exceeded",
            Self::LanguageModel(_) => "language_model",
            Self::Credential(_) => "credential",
            Self::Config(_) => "config",
            Self::Protocol(_) => "protocol",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
        }
    }

    /// Shorthand for a fault raised from inside a tool body.
    pub fn tool_failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
