use std::path::PathBuf;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use docflow_core::Permission;
use docflow_service::SubmitTask;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::ApiState;

/// Form fields carried alongside the uploaded file become engine `options`,
/// verbatim; only `file`, `backend`, and `priority` are given special
/// handling because they route the submission rather than configure an
/// engine.
const ROUTING_FIELDS: &[&str] = &["file", "backend", "priority"];

fn coerce(text: &str) -> Value {
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => text
            .parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| Value::String(text.to_string())),
    }
}

/// Streams the uploaded file to `uploads/<uuid>_<name>` in bounded chunks
/// rather than buffering it whole, so one oversize PDF or video can't blow
/// out handler memory regardless of the configured chunk size.
async fn stage_file(
    storage: &docflow_core::config::StorageConfig,
    field: &mut axum::extract::multipart::Field<'_>,
) -> Result<(String, PathBuf), ApiError> {
    let original_name = field
        .file_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "upload.bin".to_string());

    tokio::fs::create_dir_all(&storage.upload_path)
        .await
        .map_err(|e| ApiError(docflow_core::CoreError::StorageFailure(e.into())))?;

    let staged_path = storage
        .upload_path
        .join(format!("{}_{original_name}", Uuid::new_v4()));
    let mut writer = tokio::fs::File::create(&staged_path)
        .await
        .map_err(|e| ApiError(docflow_core::CoreError::StorageFailure(e.into())))?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError(docflow_core::CoreError::ValidationFailure(e.to_string())))?
    {
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ApiError(docflow_core::CoreError::StorageFailure(e.into())))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| ApiError(docflow_core::CoreError::StorageFailure(e.into())))?;

    Ok((original_name, staged_path))
}

pub async fn submit(
    State(state): State<ApiState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if !principal.has(Permission::TaskSubmit) {
        return Err(ApiError(docflow_core::CoreError::Forbidden(
            "task.submit permission required".into(),
        )));
    }

    let mut file_name: Option<String> = None;
    let mut file_path: Option<PathBuf> = None;
    let mut backend = "auto".to_string();
    let mut priority: i64 = 0;
    let mut options = Map::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(docflow_core::CoreError::ValidationFailure(e.to_string())))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let (name, path) = stage_file(&state.storage, &mut field).await?;
                file_name = Some(name);
                file_path = Some(path);
            }
            "backend" => {
                if let Ok(text) = field.text().await {
                    backend = text;
                }
            }
            "priority" => {
                if let Ok(text) = field.text().await {
                    priority = text.trim().parse().unwrap_or(0);
                }
            }
            other if !ROUTING_FIELDS.contains(&other) => {
                if let Ok(text) = field.text().await {
                    options.insert(other.to_string(), coerce(&text));
                }
            }
            _ => {}
        }
    }

    let (file_name, file_path) = match (file_name, file_path) {
        (Some(n), Some(p)) => (n, p),
        _ => {
            return Err(ApiError(docflow_core::CoreError::ValidationFailure(
                "multipart request must include a 'file' field".into(),
            )))
        }
    };

    let task_id = state
        .service
        .submit_task(SubmitTask {
            file_name,
            file_path: file_path.to_string_lossy().into_owned(),
            backend,
            options: Value::Object(options),
            priority,
            user_id: Some(principal.user_id.clone()),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))))
}
