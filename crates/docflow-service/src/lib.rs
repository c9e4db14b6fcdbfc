//! The business-logic layer shared by the HTTP API and the MCP front end.
//! Both are thin transports over the same `AppState` methods, so permission
//! checks and task-lifecycle invariants live here exactly once rather than
//! being duplicated (and risking drift) across two request-handling styles.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use docflow_core::task::{ChunkInfo, NewTask, Task};
use docflow_core::{CoreError, CoreResult, Permission, Principal, TaskStatus};
use docflow_engines::registry::EngineCatalogEntry;
use docflow_engines::EngineRegistry;
use docflow_normalizer::{ImageUploader, STANDARD_JSON_NAME, STANDARD_MARKDOWN_NAME};
use docflow_store::{PriorityQueue, QueueStats, TaskStore};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// What `submit_task` needs from a caller; the HTTP layer builds this once
/// the multipart upload has been staged to `file_path`, the MCP layer once
/// it has downloaded its `source_url` to the same staging area.
#[derive(Debug, Clone)]
pub struct SubmitTask {
    pub file_name: String,
    pub file_path: String,
    pub backend: String,
    pub options: Value,
    pub priority: i64,
    pub user_id: Option<String>,
}

/// Which result artifacts a task-status read should include. Reading both
/// is the default: callers that only want one still pay for a single extra
/// file read, which is cheap next to the extraction itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Markdown,
    Json,
    Both,
}

impl ResultFormat {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("markdown") => ResultFormat::Markdown,
            Some("json") => ResultFormat::Json,
            _ => ResultFormat::Both,
        }
    }

    fn wants_markdown(self) -> bool {
        matches!(self, ResultFormat::Markdown | ResultFormat::Both)
    }

    fn wants_json(self) -> bool {
        matches!(self, ResultFormat::Json | ResultFormat::Both)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskProgress {
    pub completed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub chunk_info: Option<ChunkInfo>,
}

/// The response shape for a task-status read: the row plus whatever result
/// content the caller asked for and, for a fan-out parent, its children.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub file_name: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_parent: bool,
    pub subtask_progress: Option<SubtaskProgress>,
    pub children: Option<Vec<ChildView>>,
    pub markdown: Option<String>,
    pub json: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsView {
    pub counts: QueueStats,
    /// False when the out-of-process backend (Redis) could not be reached;
    /// `counts` still reflects the store, which stays authoritative either
    /// way.
    pub backend_reachable: bool,
}

/// Everything a request handler needs, bundled so neither transport crate
/// has to know how the pieces were wired together. Cloning is cheap: every
/// field is an `Arc` or a small value type.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TaskStore>,
    pub queue: Arc<dyn PriorityQueue>,
    pub registry: Arc<EngineRegistry>,
    pub uploader: Arc<dyn ImageUploader>,
}

impl AppState {
    pub fn new(
        store: Arc<TaskStore>,
        queue: Arc<dyn PriorityQueue>,
        registry: Arc<EngineRegistry>,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            uploader,
        }
    }

    /// Validates the backend/extension pairing against the engine registry,
    /// inserts the row, and enqueues it. If the out-of-process queue rejects
    /// the enqueue the row is rolled back to `cancelled` rather than left
    /// pending with nothing that will ever claim it.
    pub async fn submit_task(&self, req: SubmitTask) -> CoreResult<Uuid> {
        self.registry
            .dispatch(Path::new(&req.file_name), &req.backend)
            .map_err(|err| CoreError::ValidationFailure(err.to_string()))?;

        let new = NewTask {
            file_name: req.file_name,
            file_path: req.file_path,
            backend: req.backend,
            options: req.options,
            priority: req.priority,
            user_id: req.user_id,
        };
        let task_id = self.store.create(new).await.map_err(CoreError::StorageFailure)?;

        if let Err(err) = self.queue.enqueue(task_id, req.priority).await {
            tracing::error!(%task_id, error = %err, "enqueue failed, rolling back submitted task");
            self.store.cancel(task_id).await.ok();
            return Err(CoreError::StorageFailure(err));
        }
        tracing::info!(%task_id, "task submitted");
        Ok(task_id)
    }

    pub async fn get_task_view(
        &self,
        task_id: Uuid,
        principal: &Principal,
        format: ResultFormat,
    ) -> CoreResult<TaskView> {
        let task = self
            .store
            .get(task_id)
            .await
            .map_err(CoreError::StorageFailure)?
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;

        if !principal.can_access_owned(task.user_id.as_deref(), Permission::TaskViewAll) {
            return Err(CoreError::Forbidden(format!("task {task_id} is not owned by this caller")));
        }

        let (subtask_progress, children) = if task.is_parent {
            let rows = self
                .store
                .get_children(task_id)
                .await
                .map_err(CoreError::StorageFailure)?;
            let children = rows
                .iter()
                .map(|c| ChildView {
                    task_id: c.task_id,
                    status: c.status,
                    chunk_info: c.chunk_info(),
                })
                .collect();
            (
                Some(SubtaskProgress {
                    completed: task.child_completed,
                    total: task.child_count,
                }),
                Some(children),
            )
        } else {
            (None, None)
        };

        let (markdown, json) = self.read_result_content(&task, format).await;

        Ok(TaskView {
            task_id: task.task_id,
            status: task.status,
            file_name: task.file_name,
            error_message: task.error_message,
            created_at: task.created_at,
            completed_at: task.completed_at,
            is_parent: task.is_parent,
            subtask_progress,
            children,
            markdown,
            json,
        })
    }

    async fn read_result_content(&self, task: &Task, format: ResultFormat) -> (Option<String>, Option<Value>) {
        if task.status != TaskStatus::Completed {
            return (None, None);
        }
        let Some(result_path) = &task.result_path else {
            return (None, None);
        };

        let markdown = if format.wants_markdown() {
            tokio::fs::read_to_string(Path::new(result_path).join(STANDARD_MARKDOWN_NAME))
                .await
                .ok()
        } else {
            None
        };
        let json = if format.wants_json() {
            match tokio::fs::read_to_string(Path::new(result_path).join(STANDARD_JSON_NAME)).await {
                Ok(raw) => serde_json::from_str(&raw).ok(),
                Err(_) => None,
            }
        } else {
            None
        };
        (markdown, json)
    }

    /// Cancels a still-pending task, derequeues it from the out-of-process
    /// queue if one is in use, and unlinks the staged upload. A task already
    /// claimed for processing cannot be cancelled from here.
    pub async fn cancel_task(&self, task_id: Uuid, principal: &Principal) -> CoreResult<()> {
        let task = self
            .store
            .get(task_id)
            .await
            .map_err(CoreError::StorageFailure)?
            .ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;

        if !principal.can_access_owned(task.user_id.as_deref(), Permission::TaskDeleteAll) {
            return Err(CoreError::Forbidden(format!("task {task_id} is not owned by this caller")));
        }

        let cancelled = self.store.cancel(task_id).await.map_err(CoreError::StorageFailure)?;
        if !cancelled {
            return Err(CoreError::ConflictState(format!(
                "task {task_id} cannot be cancelled: current state is {}",
                task.status
            )));
        }

        self.queue.remove(task_id).await.ok();
        if !task.file_path.is_empty() {
            tokio::fs::remove_file(&task.file_path).await.ok();
        }
        tracing::info!(%task_id, "task cancelled");
        Ok(())
    }

    pub async fn list_tasks(
        &self,
        principal: &Principal,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> CoreResult<Vec<Task>> {
        if principal.has(Permission::TaskViewAll) {
            let tasks = match status {
                Some(s) => self.store.list_by_status(s, limit).await,
                None => self.store.list_all(limit).await,
            };
            return tasks.map_err(CoreError::StorageFailure);
        }
        self.store
            .list_for_user(&principal.user_id, status, limit)
            .await
            .map_err(CoreError::StorageFailure)
    }

    pub async fn queue_stats(&self, principal: &Principal) -> CoreResult<QueueStatsView> {
        if !principal.has(Permission::QueueView) {
            return Err(CoreError::Forbidden("queue.view permission required".into()));
        }
        let counts = self.store.queue_stats().await.map_err(CoreError::StorageFailure)?;
        let backend_reachable = self.queue.stats().await.is_ok();
        Ok(QueueStatsView {
            counts,
            backend_reachable,
        })
    }

    /// Deletes completed/failed rows (and their filesystem artifacts) older
    /// than `days`. Returns the count removed.
    pub async fn cleanup(&self, principal: &Principal, days: i64) -> CoreResult<usize> {
        if !principal.has(Permission::QueueManage) {
            return Err(CoreError::Forbidden("queue.manage permission required".into()));
        }
        let removed = self.store.cleanup_older_than(days).await.map_err(CoreError::StorageFailure)?;
        tracing::info!(count = removed.len(), days, "retention sweep removed tasks");
        Ok(removed.len())
    }

    /// Requeues tasks whose processing claim has aged past `timeout`.
    /// Returns the count reclaimed.
    pub async fn reset_stale(&self, principal: &Principal, timeout: Duration) -> CoreResult<usize> {
        if !principal.has(Permission::QueueManage) {
            return Err(CoreError::Forbidden("queue.manage permission required".into()));
        }
        let recovered = self.queue.recover_stale(timeout).await.map_err(CoreError::StorageFailure)?;
        tracing::info!(count = recovered.len(), "reclaimed stale processing tasks");
        Ok(recovered.len())
    }

    /// Public: the registry's static roster, unauthenticated like any other
    /// discovery endpoint.
    pub fn engine_catalog(&self) -> Vec<EngineCatalogEntry> {
        self.registry.catalog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_engines::{default_registry, EngineBinaries};
    use docflow_normalizer::DisabledUploader;
    use docflow_store::EmbeddedQueue;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    async fn state() -> AppState {
        let store = Arc::new(TaskStore::connect_in_memory().await.unwrap());
        let queue: Arc<dyn PriorityQueue> =
            Arc::new(EmbeddedQueue::new(store.clone(), "test-worker".into(), StdDuration::from_millis(10)));
        let registry = Arc::new(default_registry(&EngineBinaries::default()));
        let uploader: Arc<dyn ImageUploader> = Arc::new(DisabledUploader);
        AppState::new(store, queue, registry, uploader)
    }

    fn submit(user: &str) -> SubmitTask {
        SubmitTask {
            file_name: "report.pdf".into(),
            file_path: "/tmp/report.pdf".into(),
            backend: "auto".into(),
            options: json!({}),
            priority: 0,
            user_id: Some(user.to_string()),
        }
    }

    fn principal(user: &str, perms: Vec<Permission>) -> Principal {
        Principal {
            user_id: user.to_string(),
            permissions: docflow_core::PermissionSet::new(perms),
        }
    }

    #[tokio::test]
    async fn submit_rejects_unroutable_backend() {
        let app = state().await;
        let mut req = submit("u1");
        req.backend = "sensevoice".into();
        let err = app.submit_task(req).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn owner_can_view_their_own_task() {
        let app = state().await;
        let id = app.submit_task(submit("u1")).await.unwrap();
        let who = principal("u1", vec![Permission::TaskSubmit]);
        let view = app.get_task_view(id, &who, ResultFormat::Both).await.unwrap();
        assert_eq!(view.task_id, id);
    }

    #[tokio::test]
    async fn stranger_without_view_all_is_forbidden() {
        let app = state().await;
        let id = app.submit_task(submit("u1")).await.unwrap();
        let who = principal("u2", vec![Permission::TaskSubmit]);
        let err = app.get_task_view(id, &who, ResultFormat::Both).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn view_all_bypasses_ownership() {
        let app = state().await;
        let id = app.submit_task(submit("u1")).await.unwrap();
        let who = principal("admin", vec![Permission::TaskViewAll]);
        let view = app.get_task_view(id, &who, ResultFormat::Both).await.unwrap();
        assert_eq!(view.task_id, id);
    }

    #[tokio::test]
    async fn cancel_requires_ownership_or_delete_all() {
        let app = state().await;
        let id = app.submit_task(submit("u1")).await.unwrap();
        let stranger = principal("u2", vec![Permission::TaskSubmit]);
        assert!(matches!(
            app.cancel_task(id, &stranger).await.unwrap_err(),
            CoreError::Forbidden(_)
        ));

        let owner = principal("u1", vec![Permission::TaskSubmit]);
        app.cancel_task(id, &owner).await.unwrap();

        let again = app.cancel_task(id, &owner).await.unwrap_err();
        assert!(matches!(again, CoreError::ConflictState(_)));
    }

    #[tokio::test]
    async fn list_tasks_is_scoped_without_view_all() {
        let app = state().await;
        app.submit_task(submit("u1")).await.unwrap();
        app.submit_task(submit("u2")).await.unwrap();

        let u1 = principal("u1", vec![Permission::TaskSubmit]);
        let mine = app.list_tasks(&u1, None, 10).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id.as_deref(), Some("u1"));

        let admin = principal("admin", vec![Permission::TaskViewAll]);
        let all = app.list_tasks(&admin, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn queue_stats_requires_permission() {
        let app = state().await;
        let who = principal("u1", vec![Permission::TaskSubmit]);
        assert!(matches!(
            app.queue_stats(&who).await.unwrap_err(),
            CoreError::Forbidden(_)
        ));

        let viewer = principal("u1", vec![Permission::QueueView]);
        let stats = app.queue_stats(&viewer).await.unwrap();
        assert!(stats.backend_reachable);
    }

    #[test]
    fn engine_catalog_is_unauthenticated() {
        let registry = default_registry(&EngineBinaries::default());
        assert!(!registry.catalog().is_empty());
    }
}
