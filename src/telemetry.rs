use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::error::{AgentHostError, Result};

/// `RUST_LOG` wins over the configured level when set.
pub fn env_filter(cfg: &TelemetryConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|err| AgentHostError::Config(format!("invalid log filter `{}`: {err}", cfg.level)))
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &TelemetryConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(cfg)?)
        .with_target(false);
    let installed = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| AgentHostError::Config(format!("failed to install tracing subscriber: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_filters() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let cfg = TelemetryConfig {
            level: "agent_host=loud".into(),
            json: false,
        };
        assert!(env_filter(&cfg).is_err());
        assert!(env_filter(&TelemetryConfig::default()).is_ok());
    }
}
