use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::{
    ApiKeyCredential, BearerTokenCredential, CredentialProvider, EnvironmentCredential,
};
use crate::error::{AgentHostError, Result};
use crate::turn::TurnSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8088
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Azure,
    OpenAi,
    Stub,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Inline,
    #[default]
    Environment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialScheme {
    #[default]
    ApiKey,
    Bearer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    #[serde(default)]
    pub source: CredentialSource,
    #[serde(default)]
    pub scheme: CredentialScheme,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_credential_env")]
    pub env_var: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            source: CredentialSource::default(),
            scheme: CredentialScheme::default(),
            value: None,
            env_var: default_credential_env(),
        }
    }
}

fn default_credential_env() -> String {
    "AZURE_OPENAI_API_KEY".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment_name: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub credential: CredentialConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Stub,
            endpoint: None,
            deployment_name: default_deployment(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            credential: CredentialConfig::default(),
        }
    }
}

fn default_deployment() -> String {
    "gpt-4.1".into()
}

fn default_api_version() -> String {
    "2024-10-21".into()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn credential_provider(&self) -> Result<Arc<dyn CredentialProvider>> {
        let cred = &self.credential;
        let provider: Arc<dyn CredentialProvider> = match cred.source {
            CredentialSource::Inline => {
                let value = cred.value.clone().filter(|v| !v.is_empty()).ok_or_else(|| {
                    AgentHostError::Config("inline credential requires `value`".into())
                })?;
                match cred.scheme {
                    CredentialScheme::ApiKey => Arc::new(ApiKeyCredential::new(value)),
                    CredentialScheme::Bearer => Arc::new(BearerTokenCredential::new(value)),
                }
            }
            CredentialSource::Environment => match cred.scheme {
                CredentialScheme::ApiKey => Arc::new(EnvironmentCredential::api_key(&cred.env_var)),
                CredentialScheme::Bearer => Arc::new(EnvironmentCredential::bearer(&cred.env_var)),
            },
        };
        Ok(provider)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_max_tool_round_trips")]
    pub max_tool_round_trips: usize,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            max_tool_round_trips: default_max_tool_round_trips(),
            tool_timeout_ms: default_tool_timeout_ms(),
        }
    }
}

fn default_instructions() -> String {
    "You are a helpful assistant.".into()
}

fn default_max_tool_round_trips() -> usize {
    8
}

fn default_tool_timeout_ms() -> u64 {
    10_000
}

impl AgentConfig {
    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            max_tool_round_trips: self.max_tool_round_trips,
            tool_timeout: Duration::from_millis(self.tool_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| AgentHostError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

        if let Some(host) = first(&["AGENT_HOST_HOST"]) {
            self.server.host = host;
        }
        if let Some(port) = first(&["AGENT_HOST_PORT"]) {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Some(provider) = first(&["AGENT_HOST_PROVIDER"]) {
            match provider.to_ascii_lowercase().as_str() {
                "azure" => self.model.provider = ModelProvider::Azure,
                "openai" => self.model.provider = ModelProvider::OpenAi,
                "stub" => self.model.provider = ModelProvider::Stub,
                _ => {}
            }
        }
        if let Some(endpoint) = first(&["AGENT_HOST_ENDPOINT", "PROJECT_ENDPOINT"]) {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(deployment) = first(&["AGENT_HOST_DEPLOYMENT", "MODEL_DEPLOYMENT_NAME"]) {
            self.model.deployment_name = deployment;
        }
        if let Some(version) = first(&["AGENT_HOST_API_VERSION"]) {
            self.model.api_version = version;
        }
        if let Some(key) = first(&["AGENT_HOST_API_KEY"]) {
            self.model.credential.source = CredentialSource::Inline;
            self.model.credential.value = Some(key);
        }
        if let Some(limit) = first(&["AGENT_HOST_MAX_TOOL_ROUND_TRIPS"]) {
            if let Ok(parsed) = limit.parse::<usize>() {
                self.agent.max_tool_round_trips = parsed;
            }
        }
        if let Some(timeout) = first(&["AGENT_HOST_TOOL_TIMEOUT_MS"]) {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.agent.tool_timeout_ms = parsed;
            }
        }
        if let Some(level) = first(&["AGENT_HOST_LOG"]) {
            self.telemetry.level = level;
        }
        if let Some(json) = first(&["AGENT_HOST_LOG_JSON"]) {
            if let Ok(parsed) = json.parse::<bool>() {
                self.telemetry.json = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.provider != ModelProvider::Stub {
            let endpoint = self.model.endpoint.as_deref().ok_or_else(|| {
                AgentHostError::Config("model endpoint is required".into())
            })?;
            let url = reqwest::Url::parse(endpoint).map_err(|err| {
                AgentHostError::Config(format!("invalid model endpoint `{endpoint}`: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AgentHostError::Config(format!(
                    "model endpoint must be http(s), got `{}`",
                    url.scheme()
                )));
            }
        }
        if self.model.deployment_name.trim().is_empty() {
            return Err(AgentHostError::Config("deployment_name must not be empty".into()));
        }
        if self.agent.max_tool_round_trips == 0 {
            return Err(AgentHostError::Config(
                "max_tool_round_trips must be at least 1".into(),
            ));
        }
        if self.agent.tool_timeout_ms == 0 {
            return Err(AgentHostError::Config("tool_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }
}
