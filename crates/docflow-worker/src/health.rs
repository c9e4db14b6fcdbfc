use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::shutdown::ShutdownFlag;

#[derive(Clone)]
struct HealthState {
    worker_id: String,
    shutdown: Arc<ShutdownFlag>,
}

/// A minimal liveness endpoint for this worker process, bound to
/// `--port`/`WORKER_PORT`. Orchestrators use it to tell a wedged worker from
/// one that is simply between poll cycles; it carries no task data, unlike
/// the API's `/api/v1/health`.
pub async fn serve(port: u16, worker_id: String, shutdown: Arc<ShutdownFlag>) -> anyhow::Result<()> {
    let state = HealthState { worker_id, shutdown };
    let app = Router::new().route("/healthz", get(healthz)).with_state(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "worker health endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let status = if state.shutdown.is_requested() { "draining" } else { "ok" };
    Json(json!({ "status": status, "worker_id": state.worker_id }))
}
