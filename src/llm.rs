//! Model backend abstraction and the chat-completions clients.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{ModelConfig, ModelProvider};
use crate::credential::{BearerTokenCredential, CredentialProvider};
use crate::error::{AgentHostError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
///
/// A completion carrying tool calls is a tool-invocation request; anything
/// else is the final text reply.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion>;
}

/// Build the configured backend.
pub fn model_from_config(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match cfg.provider {
        ModelProvider::Azure => Arc::new(AzureOpenAiClient::from_config(cfg)?),
        ModelProvider::OpenAi => Arc::new(OpenAiClient::from_config(cfg)?),
        ModelProvider::Stub => StubModel::new(Vec::new())
            .with_fallback(ModelCompletion::text("stub model reply")),
    };
    Ok(model)
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one attempt, classified for the retry loop.
#[derive(Debug)]
pub enum AttemptError {
    Transient(AgentHostError),
    Permanent(AgentHostError),
}

/// Retries transient backend failures with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Permanent(err)) => return Err(err),
                Err(AttemptError::Transient(err)) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    warn!(attempt, err = %err, "transient backend failure, retrying");
                    tokio::time::sleep(self.backoff * (attempt + 1)).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat-completions wire format, shared by OpenAI and Azure OpenAI
// ─────────────────────────────────────────────────────────────────────────────

fn serialize_tool_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = if message.tool_calls.is_empty() {
                None
            } else {
                Some(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            r#type: "function".to_string(),
                            function: WireFunctionCall {
                                name: call.name.clone(),
                                arguments: serialize_tool_arguments(&call.arguments),
                            },
                        })
                        .collect(),
                )
            };

            let content = if tool_calls.is_some() && message.content.is_empty() {
                None
            } else {
                Some(message.content.clone())
            };

            WireMessage {
                role,
                content,
                tool_call_id: message
                    .tool_result
                    .as_ref()
                    .and_then(|result| result.tool_call_id.clone()),
                tool_calls,
            }
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolDescription]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: tool.name.clone(),
                    description: Some(tool.description.clone()),
                    parameters: Some(tool.parameters.clone()),
                },
            })
            .collect(),
    )
}

fn from_wire_response(body: WireResponse) -> Result<ModelCompletion> {
    let first = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentHostError::LanguageModel("backend returned no choices".into()))?;

    let tool_calls = first
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_tool_arguments(&call.function.arguments),
        })
        .collect();

    Ok(ModelCompletion {
        content: first.message.content.filter(|text| !text.is_empty()),
        tool_calls,
    })
}

fn classify_status(status: reqwest::StatusCode, body: &str, provider: &str) -> AttemptError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AttemptError::Transient(AgentHostError::LanguageModel(format!(
            "{provider} rate limit exceeded: {body}"
        )));
    }
    let err = AgentHostError::LanguageModel(format!("{provider} request failed with {status}: {body}"));
    if status.is_server_error() {
        AttemptError::Transient(err)
    } else {
        AttemptError::Permanent(err)
    }
}

/// One chat-completions endpoint plus how to authenticate against it.
#[derive(Clone)]
struct ChatTransport {
    provider: &'static str,
    http: reqwest::Client,
    url: String,
    model: Option<String>,
    credential: Arc<dyn CredentialProvider>,
    retry: RetryPolicy,
}

impl ChatTransport {
    fn new(
        provider: &'static str,
        url: String,
        model: Option<String>,
        credential: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| AgentHostError::LanguageModel(format!("http client error: {err}")))?,
            url,
            model,
            credential,
            retry: RetryPolicy::default(),
        })
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let wire_tools = to_wire_tools(tools);
        let mut payload = json!({
            "messages": to_wire_messages(messages),
        });
        if let Some(model) = &self.model {
            payload["model"] = Value::String(model.clone());
        }
        if let Some(wire_tools) = wire_tools {
            payload["tools"] = serde_json::to_value(wire_tools)?;
            payload["tool_choice"] = Value::String("auto".into());
        }

        let credential = self.credential.credential().await?;
        debug!(provider = self.provider, messages = messages.len(), tools = tools.len(), "sending chat completion");

        let body: WireResponse = self
            .retry
            .retry(|_| {
                let request = credential.apply(self.http.post(&self.url)).json(&payload);
                async move {
                    let resp = request.send().await.map_err(|err| {
                        AttemptError::Transient(AgentHostError::LanguageModel(format!(
                            "{} request error: {err}",
                            self.provider
                        )))
                    })?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(classify_status(status, &body, self.provider));
                    }
                    resp.json::<WireResponse>().await.map_err(|err| {
                        AttemptError::Permanent(AgentHostError::LanguageModel(format!(
                            "{} response parse error: {err}",
                            self.provider
                        )))
                    })
                }
            })
            .await?;

        from_wire_response(body)
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    transport: ChatTransport,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
    ) -> Result<Self> {
        let base = base_url.unwrap_or("https://api.openai.com/v1").trim_end_matches('/');
        Ok(Self {
            transport: ChatTransport::new(
                "openai",
                format!("{base}/chat/completions"),
                Some(model.into()),
                Arc::new(BearerTokenCredential::new(api_key)),
                Duration::from_secs(60),
            )?,
        })
    }

    /// `deployment_name` doubles as the model id.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let base = cfg
            .endpoint
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        Ok(Self {
            transport: ChatTransport::new(
                "openai",
                format!("{base}/chat/completions"),
                Some(cfg.deployment_name.clone()),
                cfg.credential_provider()?,
                cfg.request_timeout(),
            )?
            .with_retries(cfg.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.transport.retry = policy;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        self.transport.complete(messages, tools).await
    }
}

/// Chat completions against an Azure OpenAI deployment.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    transport: ChatTransport,
}

impl AzureOpenAiClient {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Ok(Self {
            transport: ChatTransport::new(
                "azure",
                Self::deployment_url(endpoint, deployment, api_version),
                None,
                credential,
                Duration::from_secs(60),
            )?,
        })
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let endpoint = cfg.endpoint.as_deref().ok_or_else(|| {
            AgentHostError::Config("Azure OpenAI requires a model endpoint".into())
        })?;
        Ok(Self {
            transport: ChatTransport::new(
                "azure",
                Self::deployment_url(endpoint, &cfg.deployment_name, &cfg.api_version),
                None,
                cfg.credential_provider()?,
                cfg.request_timeout(),
            )?
            .with_retries(cfg.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.transport.retry = policy;
        self
    }

    fn deployment_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        )
    }
}

impl ChatTransport {
    fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl LanguageModel for AzureOpenAiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        self.transport.complete(messages, tools).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic model used for tests and demos.
///
/// Replays scripted completions in order and records every history it was
/// shown.
#[derive(Default)]
pub struct StubModel {
    responses: Mutex<VecDeque<ModelCompletion>>,
    fallback: Option<ModelCompletion>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<ModelCompletion>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Completion returned once the script runs dry.
    pub fn with_fallback(self: Arc<Self>, fallback: ModelCompletion) -> Arc<Self> {
        let responses = self
            .responses
            .lock()
            .map(|mut locked| std::mem::take(&mut *locked))
            .unwrap_or_default();
        Arc::new(Self {
            responses: Mutex::new(responses),
            fallback: Some(fallback),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded_calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        self.calls
            .lock()
            .map_err(|_| AgentHostError::LanguageModel("stub model poisoned".into()))?
            .push(messages.to_vec());
        let next = self
            .responses
            .lock()
            .map_err(|_| AgentHostError::LanguageModel("stub model poisoned".into()))?
            .pop_front();
        next.or_else(|| self.fallback.clone()).ok_or_else(|| {
            AgentHostError::LanguageModel("StubModel ran out of scripted responses".into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stub_replays_script_then_fallback() {
        let stub = StubModel::new(vec![ModelCompletion::text("one")])
            .with_fallback(ModelCompletion::text("again"));
        let first = stub.complete_chat(&[Message::user("a")], &[]).await.unwrap();
        let second = stub.complete_chat(&[Message::user("b")], &[]).await.unwrap();
        assert_eq!(first.content.as_deref(), Some("one"));
        assert_eq!(second.content.as_deref(), Some("again"));
        assert_eq!(stub.call_count(), 2);
        assert_eq!(stub.recorded_calls()[1], vec![Message::user("b")]);
    }

    #[tokio::test]
    async fn exhausted_stub_is_a_backend_error() {
        let stub = StubModel::new(Vec::new());
        let err = stub.complete_chat(&[], &[]).await.unwrap_err();
        assert_eq!(err.kind(), "language_model");
    }

    #[test]
    fn wire_messages_carry_tool_calls_and_results() {
        let call = ToolCall::new("clock", json!({"tz": "UTC"})).with_id("call_9");
        let history = vec![
            Message::system("be brief"),
            Message::tool_request("", vec![call]),
            Message::tool(ToolResult::ok("clock", "noon").for_call(Some("call_9".into()))),
        ];
        let wire = serde_json::to_value(to_wire_messages(&history)).unwrap();
        assert_eq!(wire[0]["role"], "system");
        assert!(wire[1].get("content").is_none());
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], r#"{"tz":"UTC"}"#);
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_9");
        assert_eq!(wire[2]["content"], "noon");
    }

    #[test]
    fn unparsable_arguments_are_kept_as_text() {
        assert_eq!(parse_tool_arguments(""), json!({}));
        assert_eq!(parse_tool_arguments("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_tool_arguments("not json"), json!("not json"));
    }

    #[test]
    fn azure_url_targets_the_deployment() {
        let url = AzureOpenAiClient::deployment_url("https://res.openai.azure.com/", "gpt-4.1", "2024-10-21");
        assert_eq!(
            url,
            "https://res.openai.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2024-10-21"
        );
    }

    #[tokio::test]
    async fn retries_only_transient_failures() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);
        let value = policy
            .retry(|_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AttemptError::Transient(AgentHostError::LanguageModel("busy".into())))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let permanent = AtomicU32::new(0);
        let err = policy
            .retry(|_| {
                permanent.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptError::Permanent(AgentHostError::LanguageModel("denied".into()))) }
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
        assert_eq!(permanent.load(Ordering::SeqCst), 1);
    }
}
