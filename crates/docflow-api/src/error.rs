use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use docflow_core::CoreError;

/// Maps the shared error taxonomy onto an HTTP status, per the table in the
/// external interfaces section: `EngineFailure` and `UploadFailure` are
/// normally absorbed before they ever reach this edge (the former becomes a
/// task's `error_message`, the latter is logged and swallowed), so their
/// statuses here are a defensive fallback, not a path any handler expects to
/// exercise routinely.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            CoreError::ConflictState(_) => StatusCode::BAD_REQUEST,
            CoreError::EngineFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::UploadFailure(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(json!({
            "error": self.0.status_label(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
