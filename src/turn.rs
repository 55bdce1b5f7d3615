//! Drives one conversation turn: model call, tool round trips, final reply.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentHostError, Result};
use crate::invoker::{ToolInvoker, DEFAULT_TOOL_TIMEOUT};
use crate::llm::{LanguageModel, ModelCompletion};
use crate::message::{Message, ToolCall};
use crate::tool::{ToolDescription, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingModel,
    AwaitingTool,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    /// Tool round trips allowed before the turn fails.
    pub max_tool_round_trips: usize,
    pub tool_timeout: Duration,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            max_tool_round_trips: 8,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// Input history plus everything appended during the turn.
    pub history: Vec<Message>,
    pub model_calls: usize,
    pub tool_invocations: usize,
    pub tool_failures: usize,
    /// Every state entered, in order, starting with `AwaitingModel`.
    pub transitions: Vec<TurnState>,
}

#[derive(Clone)]
pub struct TurnHandler {
    model: Arc<dyn LanguageModel>,
    invoker: ToolInvoker,
    tools: Vec<ToolDescription>,
    settings: TurnSettings,
}

impl TurnHandler {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
        settings: TurnSettings,
    ) -> Self {
        let tools = registry.describe();
        let invoker = ToolInvoker::new(registry).with_timeout(settings.tool_timeout);
        Self {
            model,
            invoker,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn tools(&self) -> &[ToolDescription] {
        &self.tools
    }

    pub async fn run(&self, history: Vec<Message>, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let mut history = history;
        let mut transitions = vec![TurnState::AwaitingModel];
        let mut model_calls = 0;
        let mut tool_invocations = 0;
        let mut tool_failures = 0;
        let mut round_trips = 0;

        loop {
            debug!(round_trip = round_trips, messages = history.len(), "calling model backend");
            let completion = self.call_model(&history, cancel).await?;
            model_calls += 1;

            if !completion.requests_tools() {
                let reply = completion.content.ok_or_else(|| {
                    AgentHostError::Protocol("model returned neither text nor tool calls".into())
                })?;
                history.push(Message::assistant(&reply));
                transitions.push(TurnState::Done);
                info!(model_calls, tool_invocations, "turn completed");
                return Ok(TurnOutcome {
                    reply,
                    history,
                    model_calls,
                    tool_invocations,
                    tool_failures,
                    transitions,
                });
            }

            if round_trips >= self.settings.max_tool_round_trips {
                warn!(
                    limit = self.settings.max_tool_round_trips,
                    model_calls, "tool loop limit exceeded"
                );
                return Err(AgentHostError::ToolLoopLimitExceeded {
                    limit: self.settings.max_tool_round_trips,
                });
            }
            round_trips += 1;
            transitions.push(TurnState::AwaitingTool);

            let ModelCompletion {
                content,
                tool_calls,
            } = completion;
            let calls = assign_call_ids(tool_calls, round_trips);
            history.push(Message::tool_request(content.unwrap_or_default(), calls.clone()));

            // Results land in the order the model listed them.
            for call in &calls {
                info!(round_trip = round_trips, tool = %call.name, "invoking tool");
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentHostError::Cancelled),
                    result = self.invoker.invoke(call) => result,
                };
                tool_invocations += 1;
                if result.is_error() {
                    tool_failures += 1;
                }
                history.push(Message::tool(result));
            }
            transitions.push(TurnState::AwaitingModel);
        }
    }

    async fn call_model(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ModelCompletion> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentHostError::Cancelled),
            completion = self.model.complete_chat(history, &self.tools) => completion,
        }
    }
}

fn assign_call_ids(calls: Vec<ToolCall>, round_trip: usize) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.is_none() {
                call.id = Some(format!("call_{round_trip}_{index}"));
            }
            call
        })
        .collect()
}
