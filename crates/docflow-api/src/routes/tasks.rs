use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use docflow_core::CoreError;
use docflow_service::ResultFormat;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub format: Option<String>,
}

pub async fn get_task(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(task_id): Path<Uuid>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = ResultFormat::parse(query.format.as_deref());
    let view = state
        .service
        .get_task_view(task_id, &principal, format)
        .await?;
    Ok(Json(view))
}

pub async fn cancel_task(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.cancel_task(task_id, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn parse_status(raw: Option<&str>) -> Result<Option<docflow_core::TaskStatus>, ApiError> {
    raw.map(|s| s.parse::<docflow_core::TaskStatus>())
        .transpose()
        .map_err(|e: String| ApiError(CoreError::ValidationFailure(e)))
}
