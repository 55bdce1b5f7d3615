//! Request entry point: turns an inbound request into a driven turn and a
//! packaged response.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::ConversationAgent;
use crate::error::{AgentHostError, Result};
use crate::message::{Message, Role};
use crate::metrics::MetricsTracker;

type AgentFactory = Arc<dyn Fn() -> Result<Arc<dyn ConversationAgent>> + Send + Sync>;

/// Where the host gets the agent for each request.
#[derive(Clone)]
pub enum AgentSource {
    /// One agent built at start-up, reused by every request.
    Shared(Arc<dyn ConversationAgent>),
    /// A fresh agent per request.
    Factory(AgentFactory),
}

impl AgentSource {
    fn resolve(&self) -> Result<Arc<dyn ConversationAgent>> {
        match self {
            AgentSource::Shared(agent) => Ok(agent.clone()),
            AgentSource::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for AgentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSource::Shared(agent) => f.debug_tuple("Shared").field(&agent.name()).finish(),
            AgentSource::Factory(_) => f.write_str("Factory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub input: String,
    /// Prior turns of this conversation, as returned by earlier responses.
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub include_history: bool,
}

impl AgentRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            input: input.into(),
            history: Vec::new(),
            include_history: false,
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn including_history(mut self) -> Self {
        self.include_history = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub conversation_id: String,
    pub status: ResponseStatus,
    /// Final reply, or a user-facing failure message.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
}

impl AgentResponse {
    pub fn is_completed(&self) -> bool {
        self.status == ResponseStatus::Completed
    }
}

/// Drives one turn per inbound request. Holds no per-conversation state.
#[derive(Debug, Clone)]
pub struct AgentHost {
    source: AgentSource,
    metrics: MetricsTracker,
}

impl AgentHost {
    pub fn new<A: ConversationAgent + 'static>(agent: A) -> Self {
        Self::shared(Arc::new(agent))
    }

    pub fn shared(agent: Arc<dyn ConversationAgent>) -> Self {
        Self {
            source: AgentSource::Shared(agent),
            metrics: MetricsTracker::default(),
        }
    }

    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ConversationAgent>> + Send + Sync + 'static,
    {
        Self {
            source: AgentSource::Factory(Arc::new(factory)),
            metrics: MetricsTracker::default(),
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub async fn handle_request(&self, request: AgentRequest) -> AgentResponse {
        self.handle_request_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like `handle_request`, aborting in-flight model and tool calls once
    /// `cancel` fires.
    pub async fn handle_request_with_cancel(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("turn", conversation_id = %conversation_id);
        self.drive(conversation_id, request, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        conversation_id: String,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let guard = self.metrics.start_turn();
        let include_history = request.include_history;

        let outcome = match self.source.resolve() {
            Ok(agent) => {
                info!(agent = agent.name(), prior_messages = request.history.len(), "handling request");
                let history = initial_history(agent.instructions(), request.history, request.input);
                agent.run_turn(history, &cancel).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outcome) => {
                guard.succeed(&outcome);
                AgentResponse {
                    conversation_id,
                    status: ResponseStatus::Completed,
                    output: outcome.reply,
                    error: None,
                    history: include_history.then(|| without_system(outcome.history)),
                }
            }
            Err(err) => {
                warn!(kind = err.kind(), err = %err, "turn failed");
                guard.fail(&err);
                AgentResponse {
                    conversation_id,
                    status: ResponseStatus::Failed,
                    output: failure_reply(&err).to_string(),
                    error: Some(ResponseError {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    }),
                    history: None,
                }
            }
        }
    }
}

/// System instruction first (exactly once), then prior turns, then the new
/// user message. System messages in `prior` are dropped.
pub fn initial_history(instructions: &str, prior: Vec<Message>, input: String) -> Vec<Message> {
    let mut history = Vec::with_capacity(prior.len() + 2);
    if !instructions.is_empty() {
        history.push(Message::system(instructions));
    }
    history.extend(prior.into_iter().filter(|m| m.role != Role::System));
    history.push(Message::user(input));
    history
}

fn without_system(history: Vec<Message>) -> Vec<Message> {
    history
        .into_iter()
        .filter(|m| m.role != Role::System)
        .collect()
}

/// User-facing text for a failed turn.
pub fn failure_reply(err: &AgentHostError) -> &'static str {
    match err {
        AgentHostError::ToolLoopLimitExceeded { .. } => "unable to complete request",
        AgentHostError::UnknownTool(_)
        | AgentHostError::ToolArgument { .. }
        | AgentHostError::ToolExecution { .. }
        | AgentHostError::ToolTimeout { .. } => "internal tool error",
        AgentHostError::LanguageModel(_) | AgentHostError::Credential(_) => {
            "the model backend is unavailable"
        }
        AgentHostError::Cancelled => "request cancelled",
        AgentHostError::Config(_)
        | AgentHostError::Protocol(_)
        | AgentHostError::DuplicateTool(_)
        | AgentHostError::Io(_)
        | AgentHostError::Serde(_) => "unable to complete request",
    }
}
