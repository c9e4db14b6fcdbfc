use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

pub async fn cleanup(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<CleanupQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let removed = state.service.cleanup(&principal, query.days.unwrap_or(30)).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct ResetStaleQuery {
    pub timeout_minutes: Option<i64>,
}

pub async fn reset_stale(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<ResetStaleQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let timeout = Duration::from_secs(query.timeout_minutes.unwrap_or(30).max(0) as u64 * 60);
    let recovered = state.service.reset_stale(&principal, timeout).await?;
    Ok(Json(json!({ "recovered": recovered })))
}
