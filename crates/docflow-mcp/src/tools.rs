use std::path::PathBuf;

use base64::Engine as _;
use docflow_core::config::StorageConfig;
use docflow_core::{CoreError, Permission, PermissionSet, Principal, TaskStatus};
use docflow_service::{AppState, ResultFormat, SubmitTask};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// The MCP transport is a trusted local stdio pipe with exactly one caller,
/// so there is no per-request credential to resolve the way the HTTP API
/// does. Every call acts as this fixed principal. It holds `task.view_all`
/// so `get_task_status`/`list_tasks` aren't artificially scoped to tasks the
/// MCP process itself submitted, but not `task.delete_all` / `queue.manage`:
/// destructive and administrative operations stay behind the HTTP API.
fn mcp_principal() -> Principal {
    Principal {
        user_id: "mcp".to_string(),
        permissions: PermissionSet::new(vec![
            Permission::TaskSubmit,
            Permission::TaskViewAll,
            Permission::QueueView,
        ]),
    }
}

#[derive(Clone)]
pub struct McpContext {
    pub service: AppState,
    pub storage: StorageConfig,
    pub http_client: reqwest::Client,
}

/// Mirrors the content/isError split an MCP tool result carries: a
/// successful call's payload is serialized into a single text content
/// block, a failed one carries the error taxonomy's status label alongside
/// its message.
pub enum ToolOutcome {
    Success(Value),
    Error { code: String, message: String },
}

impl ToolOutcome {
    pub fn into_result(self) -> Value {
        match self {
            ToolOutcome::Success(data) => json!({
                "content": [ { "type": "text", "text": data.to_string() } ],
                "isError": false,
            }),
            ToolOutcome::Error { code, message } => json!({
                "content": [ { "type": "text", "text": format!("{code}: {message}") } ],
                "isError": true,
            }),
        }
    }
}

impl From<CoreError> for ToolOutcome {
    fn from(err: CoreError) -> Self {
        ToolOutcome::Error {
            code: err.status_label().to_string(),
            message: err.to_string(),
        }
    }
}

pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "parse_document",
            "description": "Submit a document for extraction. Provide either content_base64 or source_url.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_name": { "type": "string" },
                    "content_base64": { "type": "string" },
                    "source_url": { "type": "string" },
                    "backend": { "type": "string", "default": "auto" },
                    "priority": { "type": "integer", "default": 0 },
                    "options": { "type": "object" }
                },
                "required": ["file_name"]
            }
        },
        {
            "name": "get_task_status",
            "description": "Fetch status and, once completed, result content for a task.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task_id": { "type": "string" },
                    "format": { "type": "string", "enum": ["markdown", "json", "both"] }
                },
                "required": ["task_id"]
            }
        },
        {
            "name": "list_tasks",
            "description": "List tasks visible to this caller, optionally filtered by status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "status": { "type": "string" },
                    "limit": { "type": "integer", "default": 50 }
                }
            }
        },
        {
            "name": "get_queue_stats",
            "description": "Counts of tasks by status.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

pub async fn call_tool(ctx: &McpContext, name: &str, arguments: Value) -> ToolOutcome {
    let result = match name {
        "parse_document" => parse_document(ctx, arguments).await,
        "get_task_status" => get_task_status(ctx, arguments).await,
        "list_tasks" => list_tasks(ctx, arguments).await,
        "get_queue_stats" => get_queue_stats(ctx).await,
        other => Err(CoreError::ValidationFailure(format!("unknown tool: {other}"))),
    };
    match result {
        Ok(value) => ToolOutcome::Success(value),
        Err(err) => err.into(),
    }
}

async fn stage_from_base64(storage: &StorageConfig, file_name: &str, content_base64: &str) -> Result<PathBuf, CoreError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content_base64)
        .map_err(|e| CoreError::ValidationFailure(format!("invalid base64 payload: {e}")))?;
    tokio::fs::create_dir_all(&storage.upload_path)
        .await
        .map_err(|e| CoreError::StorageFailure(e.into()))?;
    let path = storage.upload_path.join(format!("{}_{file_name}", Uuid::new_v4()));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| CoreError::StorageFailure(e.into()))?;
    Ok(path)
}

async fn stage_from_url(ctx: &McpContext, storage: &StorageConfig, file_name: &str, source_url: &str) -> Result<PathBuf, CoreError> {
    let response = ctx
        .http_client
        .get(source_url)
        .send()
        .await
        .map_err(|e| CoreError::UploadFailure(format!("fetching {source_url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::UploadFailure(format!("reading {source_url}: {e}")))?;
    tokio::fs::create_dir_all(&storage.upload_path)
        .await
        .map_err(|e| CoreError::StorageFailure(e.into()))?;
    let path = storage.upload_path.join(format!("{}_{file_name}", Uuid::new_v4()));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| CoreError::StorageFailure(e.into()))?;
    Ok(path)
}

async fn parse_document(ctx: &McpContext, arguments: Value) -> Result<Value, CoreError> {
    let file_name = arguments
        .get("file_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::ValidationFailure("file_name is required".into()))?
        .to_string();
    let backend = arguments
        .get("backend")
        .and_then(|v| v.as_str())
        .unwrap_or("auto")
        .to_string();
    let priority = arguments.get("priority").and_then(|v| v.as_i64()).unwrap_or(0);
    let options = arguments.get("options").cloned().unwrap_or_else(|| Value::Object(Map::new()));

    let staged = match (
        arguments.get("content_base64").and_then(|v| v.as_str()),
        arguments.get("source_url").and_then(|v| v.as_str()),
    ) {
        (Some(content), _) => stage_from_base64(&ctx.storage, &file_name, content).await?,
        (None, Some(url)) => stage_from_url(ctx, &ctx.storage, &file_name, url).await?,
        (None, None) => {
            return Err(CoreError::ValidationFailure(
                "either content_base64 or source_url is required".into(),
            ))
        }
    };

    let task_id = ctx
        .service
        .submit_task(SubmitTask {
            file_name,
            file_path: staged.to_string_lossy().into_owned(),
            backend,
            options,
            priority,
            user_id: Some(mcp_principal().user_id),
        })
        .await?;

    Ok(json!({ "task_id": task_id }))
}

async fn get_task_status(ctx: &McpContext, arguments: Value) -> Result<Value, CoreError> {
    let task_id = arguments
        .get("task_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::ValidationFailure("task_id is required".into()))?;
    let task_id =
        Uuid::parse_str(task_id).map_err(|e| CoreError::ValidationFailure(format!("invalid task_id: {e}")))?;
    let format = ResultFormat::parse(arguments.get("format").and_then(|v| v.as_str()));

    let view = ctx.service.get_task_view(task_id, &mcp_principal(), format).await?;
    serde_json::to_value(view).map_err(|e| CoreError::ValidationFailure(e.to_string()))
}

async fn list_tasks(ctx: &McpContext, arguments: Value) -> Result<Value, CoreError> {
    let status = arguments
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(CoreError::ValidationFailure)?;
    let limit = arguments.get("limit").and_then(|v| v.as_i64()).unwrap_or(50).clamp(1, 500);

    let tasks = ctx.service.list_tasks(&mcp_principal(), status, limit).await?;
    serde_json::to_value(tasks).map_err(|e| CoreError::ValidationFailure(e.to_string()))
}

async fn get_queue_stats(ctx: &McpContext) -> Result<Value, CoreError> {
    let stats = ctx.service.queue_stats(&mcp_principal()).await?;
    serde_json::to_value(stats).map_err(|e| CoreError::ValidationFailure(e.to_string()))
}
