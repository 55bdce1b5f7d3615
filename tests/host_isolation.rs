//! Concurrent requests through one host never see each other's messages.

use std::sync::Arc;
use std::time::Duration;

use agent_host::{
    Agent, AgentHost, AgentRequest, LanguageModel, Message, ModelCompletion, ResponseStatus, Role,
    ToolDescription,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Replies with every user message it was shown, after a short pause so
/// concurrent turns interleave.
struct EchoUsers;

#[async_trait]
impl LanguageModel for EchoUsers {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
    ) -> agent_host::Result<ModelCompletion> {
        let system = messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system, 1, "exactly one system message per turn");
        assert_eq!(messages[0].role, Role::System);
        let users: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        let delay = 5 * (users.last().map(|u| u.len()).unwrap_or(1) % 4) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(ModelCompletion::text(users.join("|")))
    }
}

/// Never answers.
struct Stalled;

#[async_trait]
impl LanguageModel for Stalled {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
    ) -> agent_host::Result<ModelCompletion> {
        std::future::pending().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_separate_histories() {
    let host = Arc::new(AgentHost::new(
        Agent::new(Arc::new(EchoUsers)).with_instructions("echo"),
    ));

    let mut handles = Vec::new();
    for i in 0..16 {
        let host = host.clone();
        handles.push(tokio::spawn(async move {
            let prior = vec![
                Message::system("stale instructions"),
                Message::user(format!("earlier-{i}")),
                Message::assistant(format!("ok-{i}")),
            ];
            let request = AgentRequest::new(format!("now-{i}"))
                .with_conversation_id(format!("conv-{i}"))
                .with_history(prior);
            (i, host.handle_request(request).await)
        }));
    }

    for handle in handles {
        let (i, response) = handle.await.unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.conversation_id, format!("conv-{i}"));
        assert_eq!(response.output, format!("earlier-{i}|now-{i}"));
    }
    assert_eq!(host.metrics().summary().successes, 16);
}

#[tokio::test]
async fn cancelled_request_fails_without_waiting_for_the_backend() {
    let host = AgentHost::new(Agent::new(Arc::new(Stalled)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        host.handle_request_with_cancel(AgentRequest::new("hello?"), cancel),
    )
    .await
    .expect("cancellation should end the turn");

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.output, "request cancelled");
    assert_eq!(response.error.unwrap().kind, "cancelled");
}

#[tokio::test]
async fn abandoned_request_is_recorded_as_cancelled() {
    let host = AgentHost::new(Agent::new(Arc::new(Stalled)));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), host.handle_request(AgentRequest::new("hi")))
            .await;
    assert!(abandoned.is_err());

    let summary = host.metrics().summary();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.failures, 1);
    assert_eq!(host.metrics().reports()[0].error_kind.as_deref(), Some("cancelled"));
}
