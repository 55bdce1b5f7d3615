#![cfg(feature = "server")]
//! HTTP surface over a stub-backed host.

use std::net::SocketAddr;

use agent_host::{
    Agent, AgentHost, AgentResponse, AgentServer, MetricsSummary, ModelCompletion, ResponseStatus,
    StubModel,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn spawn_server(host: AgentHost) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(AgentServer::new(host).serve_with_shutdown(listener, async move {
        let _ = rx.await;
    }));
    (addr, tx)
}

#[tokio::test]
async fn health_probes_answer_ok() {
    let host = AgentHost::new(Agent::new(StubModel::new(Vec::new())));
    let (addr, _shutdown) = spawn_server(host).await;

    for probe in ["liveness", "readiness"] {
        let resp = reqwest::get(format!("http://{addr}/{probe}")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
}

#[tokio::test]
async fn responses_endpoint_runs_a_turn() {
    let model = StubModel::new(vec![ModelCompletion::text("It is noon.")]);
    let host = AgentHost::new(Agent::new(model).with_instructions("tell the time"));
    let (addr, _shutdown) = spawn_server(host).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/responses"))
        .json(&json!({"conversation_id": "abc", "input": "what time is it?", "include_history": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: AgentResponse = resp.json().await.unwrap();
    assert_eq!(body.status, ResponseStatus::Completed);
    assert_eq!(body.conversation_id, "abc");
    assert_eq!(body.output, "It is noon.");
    assert_eq!(body.history.unwrap().len(), 2);

    let summary: MetricsSummary = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.successes, 1);
}

#[tokio::test]
async fn backend_failure_maps_to_bad_gateway() {
    let host = AgentHost::new(Agent::new(StubModel::new(Vec::new())));
    let (addr, _shutdown) = spawn_server(host).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/responses"))
        .json(&json!({"input": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: AgentResponse = resp.json().await.unwrap();
    assert_eq!(body.status, ResponseStatus::Failed);
    assert_eq!(body.output, "the model backend is unavailable");
}
