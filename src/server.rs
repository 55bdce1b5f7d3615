use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::host::{AgentHost, AgentRequest, ResponseStatus};

/// HTTP front for an [`AgentHost`].
#[derive(Clone)]
pub struct AgentServer {
    host: Arc<AgentHost>,
}

impl AgentServer {
    pub fn new(host: AgentHost) -> Self {
        Self {
            host: Arc::new(host),
        }
    }

    pub fn host(&self) -> &AgentHost {
        &self.host
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/liveness", get(|| async { "ok" }))
            .route("/readiness", get(|| async { "ok" }))
            .route("/metrics", get(metrics_summary))
            .route("/responses", post(respond))
            .with_state(self.host.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "agent server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn metrics_summary(State(host): State<Arc<AgentHost>>) -> impl IntoResponse {
    Json(host.metrics().summary())
}

async fn respond(State(host): State<Arc<AgentHost>>, Json(request): Json<AgentRequest>) -> Response {
    // Dropped with the handler future when the client goes away.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let response = host.handle_request_with_cancel(request, cancel).await;
    let status = match (&response.status, response.error.as_ref()) {
        (ResponseStatus::Completed, _) => StatusCode::OK,
        (ResponseStatus::Failed, Some(err))
            if err.kind == "language_model" || err.kind == "credential" =>
        {
            StatusCode::BAD_GATEWAY
        }
        (ResponseStatus::Failed, _) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(response)).into_response()
}
