//! Executes registered tools on behalf of the turn handler.
//!
//! Every failure mode (unknown name, bad arguments, a returned error, a panic,
//! a timeout) comes back as an error-status `ToolResult`, never as an `Err`.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::error::{AgentHostError, Result};
use crate::message::{ToolCall, ToolResult};
use crate::tool::ToolRegistry;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

pub const TIMEOUT_OUTPUT: &str = "tool timed out";

#[derive(Clone, Debug)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let result = match self.try_invoke(call).await {
            Ok(output) => {
                debug!(tool = %call.name, output_len = output.len(), "tool succeeded");
                ToolResult::ok(&call.name, output)
            }
            Err(err) => {
                warn!(tool = %call.name, kind = err.kind(), err = %err, "tool failed");
                ToolResult::error(&call.name, diagnostic(&err))
            }
        };
        result.for_call(call.id.clone())
    }

    async fn try_invoke(&self, call: &ToolCall) -> Result<String> {
        let tool = self.registry.resolve(&call.name)?;
        tool.spec().validate(&call.arguments)?;

        let arguments = match &call.arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };
        // The deadline has to hold even for tools that block their thread.
        let task = tokio::spawn(async move { tool.call(arguments).await });
        match tokio::time::timeout(self.timeout, AbortOnDropHandle::new(task)).await {
            Err(_) => Err(AgentHostError::ToolTimeout {
                tool: call.name.clone(),
                timeout: self.timeout,
            }),
            Ok(Err(joined)) if joined.is_panic() => Err(AgentHostError::tool_failure(
                &call.name,
                format!("tool panicked: {}", panic_message(joined.into_panic().as_ref())),
            )),
            Ok(Err(joined)) => Err(AgentHostError::tool_failure(&call.name, joined.to_string())),
            Ok(Ok(outcome)) => outcome.map(coerce_output),
        }
    }
}

fn diagnostic(err: &AgentHostError) -> String {
    match err {
        AgentHostError::ToolTimeout { .. } => TIMEOUT_OUTPUT.to_string(),
        other => other.to_string(),
    }
}

fn coerce_output(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
