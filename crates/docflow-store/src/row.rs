use chrono::{DateTime, Utc};
use docflow_core::task::Task;
use docflow_core::TaskStatus;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Raw column shapes as sqlite stores them; converted into `Task` at the
/// store boundary so the rest of the crate never sees TEXT/INTEGER encodings.
#[derive(Debug, FromRow)]
pub(crate) struct TaskRow {
    pub task_id: String,
    pub file_name: String,
    pub file_path: String,
    pub backend: String,
    pub options: String,
    pub priority: i64,
    pub status: String,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub retry_count: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub user_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub is_parent: i64,
    pub child_count: i64,
    pub child_completed: i64,
    pub images_uploaded: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            task_id: Uuid::parse_str(&row.task_id)?,
            file_name: row.file_name,
            file_path: row.file_path,
            backend: row.backend,
            options: serde_json::from_str(&row.options).unwrap_or(serde_json::Value::Null),
            priority: row.priority,
            status: TaskStatus::from_str(&row.status).map_err(anyhow::Error::msg)?,
            result_path: row.result_path,
            error_message: row.error_message,
            worker_id: row.worker_id,
            retry_count: row.retry_count,
            created_at: parse_ts(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: row.completed_at.as_deref().map(parse_ts).transpose()?,
            user_id: row.user_id,
            parent_task_id: row
                .parent_task_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()?,
            is_parent: row.is_parent != 0,
            child_count: row.child_count,
            child_completed: row.child_completed,
            images_uploaded: row.images_uploaded != 0,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, anyhow::Error> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
