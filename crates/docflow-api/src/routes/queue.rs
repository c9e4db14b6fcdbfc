use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::routes::tasks::parse_status;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<ListQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let status = parse_status(query.status.as_deref())?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let tasks = state.service.list_tasks(&principal, status, limit).await?;
    Ok(Json(tasks))
}

pub async fn stats(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let stats = state.service.queue_stats(&principal).await?;
    Ok(Json(stats))
}
