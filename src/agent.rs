use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::tool::ToolRegistry;
use crate::turn::{TurnHandler, TurnOutcome, TurnSettings};

/// Anything the host can drive through a conversation turn.
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    fn name(&self) -> &str;

    /// System instruction placed at the start of every history.
    fn instructions(&self) -> &str;

    async fn run_turn(&self, history: Vec<Message>, cancel: &CancellationToken) -> Result<TurnOutcome>;
}

/// A model-backed agent with a fixed set of local tools.
///
/// Built once and shared across conversations; all per-conversation state
/// travels in the history passed to `run_turn`.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: String,
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    handler: TurnHandler,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        let tools = Arc::new(ToolRegistry::new());
        Self {
            name: "agent".to_string(),
            instructions: "You are a helpful assistant.".to_string(),
            handler: TurnHandler::new(model.clone(), tools.clone(), TurnSettings::default()),
            model,
            tools,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        let settings = self.handler.settings().clone();
        self.rebuild(settings)
    }

    pub fn with_settings(self, settings: TurnSettings) -> Self {
        self.rebuild(settings)
    }

    pub fn with_max_tool_round_trips(self, limit: usize) -> Self {
        let settings = TurnSettings {
            max_tool_round_trips: limit.max(1),
            ..self.handler.settings().clone()
        };
        self.rebuild(settings)
    }

    pub fn with_tool_timeout(self, timeout: Duration) -> Self {
        let settings = TurnSettings {
            tool_timeout: timeout,
            ..self.handler.settings().clone()
        };
        self.rebuild(settings)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn settings(&self) -> &TurnSettings {
        self.handler.settings()
    }

    fn rebuild(mut self, settings: TurnSettings) -> Self {
        self.handler = TurnHandler::new(self.model.clone(), self.tools.clone(), settings);
        self
    }
}

#[async_trait]
impl ConversationAgent for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    async fn run_turn(&self, history: Vec<Message>, cancel: &CancellationToken) -> Result<TurnOutcome> {
        self.handler.run(history, cancel).await
    }
}
