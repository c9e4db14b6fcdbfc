use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use docflow_core::task::{NewTask, Task};
use docflow_core::TaskStatus;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::row::TaskRow;

/// Aggregate counts returned by `queue_stats`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// The durable task store: a pooled SQLite connection plus every state
/// transition named in the task lifecycle. No method here is a singleton —
/// callers hold an `Arc<TaskStore>` and every write opens its own pooled
/// connection and transaction.
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub async fn connect(database_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a write transaction with SQLite's write lock taken immediately,
    /// rather than sqlx's default `BEGIN DEFERRED`, so the CAS below cannot
    /// lose a lock upgrade race to a concurrent writer.
    async fn begin_immediate(&self) -> anyhow::Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    pub async fn create(&self, new: NewTask) -> anyhow::Result<Uuid> {
        let task_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (task_id, file_name, file_path, backend, options, priority, status, created_at, user_id)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(&new.file_name)
        .bind(&new.file_path)
        .bind(&new.backend)
        .bind(new.options.to_string())
        .bind(new.priority)
        .bind(&now)
        .bind(&new.user_id)
        .execute(&self.pool)
        .await?;
        Ok(task_id)
    }

    pub async fn get(&self, task_id: Uuid) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    pub async fn list_by_status(&self, status: TaskStatus, limit: i64) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = ? AND is_parent = 0 ORDER BY created_at DESC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    /// Unscoped listing across every status, for principals holding
    /// `task.view_all`. `list_by_status` covers the single-status case;
    /// this is the "give me everything" read path the admin listing uses
    /// when no status filter was supplied.
    pub async fn list_all(&self, limit: i64) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE is_parent = 0 ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<Task>> {
        let rows = match status {
            Some(s) => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE user_id = ? AND status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(s.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Task::try_from).collect()
    }

    /// The embedded-queue realization: pick the best pending, non-parent
    /// task and CAS it to processing under one writer-locked transaction.
    /// Retries a bounded number of times if the CAS loses a race (another
    /// connection claimed the same row between the SELECT and the UPDATE).
    pub async fn claim_next(&self, worker_id: &str) -> anyhow::Result<Option<Task>> {
        for _ in 0..5 {
            let mut conn = self.begin_immediate().await?;
            let candidate = sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM tasks WHERE status = 'pending' AND is_parent = 0
                 ORDER BY priority DESC, created_at ASC LIMIT 1",
            )
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = candidate else {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                return Ok(None);
            };

            let task_id = row.task_id.clone();
            let now = Utc::now().to_rfc3339();
            let affected = sqlx::query(
                "UPDATE tasks SET status = 'processing', worker_id = ?, started_at = ?
                 WHERE task_id = ? AND status = 'pending'",
            )
            .bind(worker_id)
            .bind(&now)
            .bind(&task_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            sqlx::query("COMMIT").execute(&mut *conn).await?;

            if affected == 1 {
                let mut task = Task::try_from(row)?;
                task.status = TaskStatus::Processing;
                task.worker_id = Some(worker_id.to_string());
                return Ok(Some(task));
            }
            // lost the race; retry against a fresh candidate
        }
        Ok(None)
    }

    /// CAS a specific task id from pending to processing. Used by the
    /// out-of-process queue path: Redis hands back a task id, this converts
    /// that into an authoritative claim (or a no-op if someone beat us, or
    /// the task was cancelled in the meantime).
    pub async fn try_claim(&self, task_id: Uuid, worker_id: &str) -> anyhow::Result<Option<Task>> {
        let mut conn = self.begin_immediate().await?;
        let now = Utc::now().to_rfc3339();
        let affected = sqlx::query(
            "UPDATE tasks SET status = 'processing', worker_id = ?, started_at = ?
             WHERE task_id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if affected == 0 {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(Some(Task::try_from(row)?))
    }

    pub async fn finalize_completed(
        &self,
        task_id: Uuid,
        worker_id: &str,
        result_path: &str,
    ) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = sqlx::query(
            "UPDATE tasks SET status = 'completed', result_path = ?, completed_at = ?
             WHERE task_id = ? AND status = 'processing' AND worker_id = ?",
        )
        .bind(result_path)
        .bind(&now)
        .bind(task_id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    pub async fn finalize_failed(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error_message: &str,
    ) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = ?, completed_at = ?
             WHERE task_id = ? AND status = 'processing' AND worker_id = ?",
        )
        .bind(error_message)
        .bind(&now)
        .bind(task_id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    pub async fn cancel(&self, task_id: Uuid) -> anyhow::Result<bool> {
        let affected = sqlx::query("UPDATE tasks SET status = 'cancelled' WHERE task_id = ? AND status = 'pending'")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected == 1)
    }

    /// Resets a single processing row back to pending, as `reset_stale`
    /// does for every timed-out row at once. Used by the Redis queue's own
    /// sweep, which identifies stale ids from its claim hash rather than
    /// from `started_at` directly, but must still bring the authoritative
    /// row back in line with the queue. A no-op (returns `false`) if the
    /// row already left `processing` by some other path.
    pub async fn reset_task_to_pending(&self, task_id: Uuid) -> anyhow::Result<bool> {
        let affected = sqlx::query(
            "UPDATE tasks SET status = 'pending', worker_id = NULL, retry_count = retry_count + 1
             WHERE task_id = ? AND status = 'processing'",
        )
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    pub async fn set_images_uploaded(&self, task_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET images_uploaded = 1 WHERE task_id = ?")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn queue_stats(&self) -> anyhow::Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "pending" => stats.pending = n,
                "processing" => stats.processing = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                "cancelled" => stats.cancelled = n,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Reclaims processing tasks whose claim has aged past `timeout`.
    pub async fn reset_stale(&self, timeout: Duration) -> anyhow::Result<Vec<Uuid>> {
        let cutoff = (Utc::now() - chrono::Duration::from_std(timeout)?).to_rfc3339();
        let mut conn = self.begin_immediate().await?;
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = 'processing' AND started_at < ?",
        )
        .bind(&cutoff)
        .fetch_all(&mut *conn)
        .await?;

        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in &rows {
            sqlx::query(
                "UPDATE tasks SET status = 'pending', worker_id = NULL, retry_count = retry_count + 1
                 WHERE task_id = ?",
            )
            .bind(&row.task_id)
            .execute(&mut *conn)
            .await?;
            reclaimed.push(Uuid::parse_str(&row.task_id)?);
        }
        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(reclaimed)
    }

    /// Deletes completed/failed rows (and their filesystem artifacts) older
    /// than `days`. Returns the ids removed so the caller can log a summary.
    pub async fn cleanup_older_than(&self, days: i64) -> anyhow::Result<Vec<Task>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status IN ('completed', 'failed') AND completed_at < ?",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;
        let tasks: Vec<Task> = rows.into_iter().map(Task::try_from).collect::<Result<_, _>>()?;

        for task in &tasks {
            if !task.file_path.is_empty() {
                tokio::fs::remove_file(&task.file_path).await.ok();
            }
            if let Some(result_path) = &task.result_path {
                tokio::fs::remove_dir_all(result_path).await.ok();
            }
            sqlx::query("DELETE FROM tasks WHERE task_id = ?")
                .bind(task.task_id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(tasks)
    }

    pub async fn convert_to_parent(&self, task_id: Uuid, child_count: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE tasks SET is_parent = 1, child_count = ?, status = 'processing' WHERE task_id = ?",
        )
        .bind(child_count)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_child(&self, parent_task_id: Uuid, new: NewTask) -> anyhow::Result<Uuid> {
        let child_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (task_id, file_name, file_path, backend, options, priority, status, created_at, user_id, parent_task_id)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(child_id.to_string())
        .bind(&new.file_name)
        .bind(&new.file_path)
        .bind(&new.backend)
        .bind(new.options.to_string())
        .bind(new.priority)
        .bind(&now)
        .bind(&new.user_id)
        .bind(parent_task_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(child_id)
    }

    /// Atomically increments the parent's completed-child counter and
    /// reports whether this was the last child, handing the caller the
    /// parent id exactly once so the merge only ever runs one time.
    pub async fn on_child_completed(&self, child_task_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        let mut conn = self.begin_immediate().await?;
        let parent_id: Option<String> =
            sqlx::query_scalar("SELECT parent_task_id FROM tasks WHERE task_id = ?")
                .bind(child_task_id.to_string())
                .fetch_optional(&mut *conn)
                .await?
                .flatten();

        let Some(parent_id) = parent_id else {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            return Ok(None);
        };

        sqlx::query("UPDATE tasks SET child_completed = child_completed + 1 WHERE task_id = ?")
            .bind(&parent_id)
            .execute(&mut *conn)
            .await?;

        let (child_count, child_completed, status): (i64, i64, String) = sqlx::query_as(
            "SELECT child_count, child_completed, status FROM tasks WHERE task_id = ?",
        )
        .bind(&parent_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("COMMIT").execute(&mut *conn).await?;

        if status == "processing" && child_completed >= child_count && child_count > 0 {
            Ok(Some(Uuid::parse_str(&parent_id)?))
        } else {
            Ok(None)
        }
    }

    /// Fails the parent the first time any child fails; a parent already
    /// failed or completed is left untouched.
    pub async fn on_child_failed(&self, child_task_id: Uuid, error: &str) -> anyhow::Result<()> {
        let parent_id: Option<String> =
            sqlx::query_scalar("SELECT parent_task_id FROM tasks WHERE task_id = ?")
                .bind(child_task_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        let now = Utc::now().to_rfc3339();
        let message = format!("child task {child_task_id} failed: {error}");
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = ?, completed_at = ?
             WHERE task_id = ? AND status = 'processing'",
        )
        .bind(message)
        .bind(now)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_children(&self, parent_task_id: Uuid) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE parent_task_id = ? ORDER BY created_at ASC",
        )
        .bind(parent_task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    pub async fn get_with_children(&self, task_id: Uuid) -> anyhow::Result<Option<(Task, Vec<Task>)>> {
        let Some(task) = self.get(task_id).await? else {
            return Ok(None);
        };
        let children = if task.is_parent {
            self.get_children(task_id).await?
        } else {
            Vec::new()
        };
        Ok(Some((task, children)))
    }

    pub async fn finalize_parent_completed(&self, parent_id: Uuid, result_path: &str) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET status = 'completed', result_path = ?, completed_at = ? WHERE task_id = ?",
        )
        .bind(result_path)
        .bind(now)
        .bind(parent_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fails a parent whose merge itself could not be completed (distinct
    /// from `on_child_failed`, which reacts to a single child's failure).
    /// A no-op if the parent already left `processing`.
    pub async fn finalize_parent_failed(&self, parent_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = ?, completed_at = ?
             WHERE task_id = ? AND status = 'processing'",
        )
        .bind(error_message)
        .bind(now)
        .bind(parent_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
