use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a task. Transitions are enforced by the store, not here:
/// this type only names the legal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A page range carried in a child task's `options` when the parent was split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub start_page: u32,
    pub end_page: u32,
    pub page_count: u32,
}

/// The full task row, mirroring the columns of the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub backend: String,
    pub options: serde_json::Value,
    pub priority: i64,
    pub status: TaskStatus,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub is_parent: bool,
    pub child_count: i64,
    pub child_completed: i64,
    pub images_uploaded: bool,
}

impl Task {
    pub fn chunk_info(&self) -> Option<ChunkInfo> {
        self.options
            .get("chunk_info")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Parameters accepted when a new task is inserted by the API or the splitter.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub file_name: String,
    pub file_path: String,
    pub backend: String,
    pub options: serde_json::Value,
    pub priority: i64,
    pub user_id: Option<String>,
}

impl NewTask {
    pub fn child_of(parent: &Task, chunk: ChunkInfo, file_path: String) -> Self {
        let mut options = parent.options.clone();
        if let serde_json::Value::Object(ref mut map) = options {
            map.insert(
                "chunk_info".to_string(),
                serde_json::to_value(chunk).expect("ChunkInfo serializes"),
            );
        }
        Self {
            file_name: parent.file_name.clone(),
            file_path,
            backend: parent.backend.clone(),
            options,
            priority: parent.priority,
            user_id: parent.user_id.clone(),
        }
    }
}
