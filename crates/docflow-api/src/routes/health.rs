use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::ApiState;

/// Store liveness plus queue counts. Unauthenticated by design: load
/// balancers and orchestrators hit this without a credential.
pub async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    match state.service.store.queue_stats().await {
        Ok(counts) => Json(json!({ "status": "ok", "queue": counts })),
        Err(err) => Json(json!({ "status": "degraded", "error": err.to_string() })),
    }
}
