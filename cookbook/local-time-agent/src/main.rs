//! Serves an agent that can tell the current time anywhere, backed by an
//! Azure OpenAI deployment.
//!
//! Configuration comes from `AGENT_HOST_CONFIG` (a TOML file) when set, and
//! from environment variables otherwise, e.g.:
//!
//! ```text
//! AGENT_HOST_PROVIDER=azure
//! PROJECT_ENDPOINT=https://<resource>.openai.azure.com
//! MODEL_DEPLOYMENT_NAME=gpt-4.1
//! AZURE_OPENAI_API_KEY=...
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use agent_host::tools::local_time_toolkit;
use agent_host::{
    init_tracing, model_from_config, Agent, AgentHost, AgentHostError, AgentServer, AppConfig,
    Result,
};

const INSTRUCTIONS: &str = "You are a helpful assistant that can tell users the current date and time in any location. When a user asks about the time in a city or location, use the get_local_date_time tool with the appropriate IANA timezone string for that location.";

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = match std::env::var("AGENT_HOST_CONFIG") {
        Ok(path) => AppConfig::from_env_or_file(path)?,
        Err(_) => AppConfig::from_env()?,
    };
    if config.agent.instructions == AppConfig::default().agent.instructions {
        config.agent.instructions = INSTRUCTIONS.to_string();
    }
    init_tracing(&config.telemetry)?;

    let agent = Agent::new(model_from_config(&config.model)?)
        .with_name("local_time_agent")
        .with_instructions(config.agent.instructions.clone())
        .with_tools(local_time_toolkit()?)
        .with_settings(config.agent.turn_settings());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|err| AgentHostError::Config(format!("invalid listen address: {err}")))?;
    tracing::info!(%addr, deployment = %config.model.deployment_name, "starting local time agent");

    let host = AgentHost::shared(Arc::new(agent));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    AgentServer::new(host)
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
