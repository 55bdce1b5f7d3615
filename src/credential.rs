//! Credential acquisition for model backends.
//!
//! The backend only sees a [`CredentialProvider`]; where the secret comes
//! from (inline config, environment, an identity service) stays opaque.

use std::env;
use std::fmt;

use async_trait::async_trait;

use crate::error::{AgentHostError, Result};

/// A resolved secret plus the way it must be presented.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as an `api-key` header.
    ApiKey(String),
    /// Sent as `Authorization: Bearer`.
    Bearer(String),
}

impl Credential {
    pub fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey(<redacted>)"),
            Credential::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential>;
}

pub struct ApiKeyCredential {
    key: String,
}

impl ApiKeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl CredentialProvider for ApiKeyCredential {
    async fn credential(&self) -> Result<Credential> {
        Ok(Credential::ApiKey(self.key.clone()))
    }
}

pub struct BearerTokenCredential {
    token: String,
}

impl BearerTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for BearerTokenCredential {
    async fn credential(&self) -> Result<Credential> {
        Ok(Credential::Bearer(self.token.clone()))
    }
}

/// Reads the secret from an environment variable on every request, so a
/// rotated value is picked up without a restart.
pub struct EnvironmentCredential {
    var: String,
    bearer: bool,
}

impl EnvironmentCredential {
    pub fn api_key(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            bearer: false,
        }
    }

    pub fn bearer(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            bearer: true,
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentCredential {
    async fn credential(&self) -> Result<Credential> {
        let value = env::var(&self.var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                AgentHostError::Credential(format!("environment variable `{}` is not set", self.var))
            })?;
        Ok(if self.bearer {
            Credential::Bearer(value)
        } else {
            Credential::ApiKey(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_providers_return_their_secret() {
        let key = ApiKeyCredential::new("k").credential().await.unwrap();
        assert_eq!(key, Credential::ApiKey("k".into()));
        let token = BearerTokenCredential::new("t").credential().await.unwrap();
        assert_eq!(token, Credential::Bearer("t".into()));
    }

    #[tokio::test]
    async fn missing_environment_variable_is_a_credential_error() {
        let provider = EnvironmentCredential::api_key("AGENT_HOST_TEST_UNSET_CREDENTIAL_VAR");
        let err = provider.credential().await.unwrap_err();
        assert_eq!(err.kind(), "credential");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", Credential::Bearer("super-secret".into()));
        assert!(!rendered.contains("super-secret"));
    }
}
