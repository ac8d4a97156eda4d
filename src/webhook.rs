//! Webhook endpoint — generalizes the teacher's `webhook.rs` Axum
//! listener. Still logs the inbound payload exactly as the teacher's
//! `receive_post` did, but can also hand the named PR/commit straight to
//! the Planner to kick off ingestion.

use axum::{Json, Router, extract::State, routing::{get, post}};
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct RequestPayload {
    pub action: String,
    pub repository: RepositoryPayload,
    pub workflow_run: Option<WorkflowRunPayload>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRunPayload {
    pub id: u64,
    pub head_sha: String,
}

#[derive(Clone)]
pub struct WebhookState {
    pub trigger: Sender<String>,
}

async fn hello_world() -> &'static str {
    "gha-causal-trace webhook listener"
}

async fn receive_post(State(state): State<WebhookState>, Json(payload): Json<RequestPayload>) -> &'static str {
    info!(action = %payload.action, repository = %payload.repository.full_name, "received webhook payload");

    if let Some(run) = payload.workflow_run {
        let reference = format!("{}/commit/{}", payload.repository.full_name, run.head_sha);
        if state.trigger.send(reference).await.is_err() {
            tracing::warn!("planner channel closed, dropping webhook-triggered reference");
        }
    }

    "ok"
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/", get(hello_world)).route("/", post(receive_post)).with_state(state)
}

pub async fn serve(addr: std::net::SocketAddr, trigger: Sender<String>) -> Result<(), anyhow::Error> {
    let state = WebhookState { trigger };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webhook listener started");
    axum::serve(listener, app).await?;
    Ok(())
}
