//! Current date and time in an IANA time zone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::error::{AgentHostError, Result};
use crate::tool::{ParameterType, Tool, ToolRegistry, ToolSpec};

pub const LOCAL_TIME_TOOL: &str = "get_local_date_time";

const DISPLAY_FORMAT: &str = "%A, %B %d, %Y at %I:%M %p %Z";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Registry holding just the local time tool.
pub fn local_time_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(LocalTimeTool::new())?;
    Ok(registry)
}

pub struct LocalTimeTool {
    spec: ToolSpec,
    clock: Clock,
}

impl Default for LocalTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTimeTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                LOCAL_TIME_TOOL,
                "Get the current date and time for a given timezone.",
            )
            .param(
                "iana_timezone",
                ParameterType::String,
                "The IANA timezone string (e.g., \"America/Los_Angeles\", \"America/New_York\", \"Europe/London\")",
            ),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn describe_time(&self, iana_timezone: &str) -> Result<String> {
        let tz: Tz = iana_timezone.parse().map_err(|err| {
            AgentHostError::tool_failure(
                LOCAL_TIME_TOOL,
                format!("Unable to get time for timezone '{iana_timezone}'. {err}"),
            )
        })?;
        let now = (self.clock)().with_timezone(&tz);
        Ok(format!(
            "The current date and time in {iana_timezone} is {}",
            now.format(DISPLAY_FORMAT)
        ))
    }
}

#[async_trait]
impl Tool for LocalTimeTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let zone = input
            .get("iana_timezone")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentHostError::ToolArgument {
                tool: LOCAL_TIME_TOOL.into(),
                reason: "missing `iana_timezone`".into(),
            })?;
        Ok(json!(self.describe_time(zone)?))
    }
}
