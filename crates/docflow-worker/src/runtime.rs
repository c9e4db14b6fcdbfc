use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docflow_core::config::{SplitConfig, StorageConfig};
use docflow_core::task::Task;
use docflow_core::TaskStatus;
use docflow_engines::merge::merge_ready_parent;
use docflow_engines::office::maybe_convert_office_to_pdf;
use docflow_engines::split::maybe_split;
use docflow_engines::watermark::maybe_remove_watermark;
use docflow_engines::EngineRegistry;
use docflow_normalizer::{normalize, ImageUploader};
use docflow_store::{PriorityQueue, TaskStore};
use serde_json::Value;
use uuid::Uuid;

use crate::shutdown::ShutdownFlag;

/// Everything one polling loop needs. Each loop (one per `(device, slot)`
/// pair the CLI asks for) gets its own queue handle so a redis connection or
/// an embedded-queue claim carries this loop's own `worker_id` rather than
/// one shared across every loop in the process.
pub struct WorkerContext {
    pub worker_id: String,
    pub device: Option<u32>,
    pub store: Arc<TaskStore>,
    pub queue: Arc<dyn PriorityQueue>,
    pub registry: Arc<EngineRegistry>,
    pub uploader: Arc<dyn ImageUploader>,
    pub storage: StorageConfig,
    pub split: SplitConfig,
    pub poll_interval: Duration,
    pub vllm_endpoint: Option<String>,
}

impl WorkerContext {
    fn work_dir(&self, task_id: Uuid) -> PathBuf {
        self.storage.output_path.join("work").join(task_id.to_string())
    }
}

/// How often the in-flight-task watcher re-checks the shutdown flag while a
/// task is being processed.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the poll loop: claim, dispatch, finalize, repeat; observes
/// `shutdown` between claims and gives an in-flight task up to
/// `grace_period` to finish once shutdown is requested, however far into
/// processing that task already is.
pub async fn run(ctx: Arc<WorkerContext>, shutdown: Arc<ShutdownFlag>, grace_period: Duration) {
    loop {
        if shutdown.is_requested() {
            tracing::info!(worker_id = %ctx.worker_id, "shutdown requested, leaving poll loop");
            return;
        }

        let claimed = match ctx.queue.dequeue(ctx.poll_interval).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::warn!(worker_id = %ctx.worker_id, error = %err, "dequeue failed, retrying after poll interval");
                tokio::time::sleep(ctx.poll_interval).await;
                continue;
            }
        };

        let Some(task_id) = claimed else {
            continue;
        };

        if !drive_to_completion(ctx.clone(), task_id, &shutdown, grace_period).await {
            return;
        }
    }
}

/// Runs one claimed task as a background task and watches it alongside the
/// shutdown flag. Returns `false` when the grace period elapsed with the
/// task still running and the caller should stop polling for more work.
async fn drive_to_completion(
    ctx: Arc<WorkerContext>,
    task_id: Uuid,
    shutdown: &ShutdownFlag,
    grace_period: Duration,
) -> bool {
    let mut handle = tokio::spawn(process_claim(ctx.clone(), task_id));
    loop {
        tokio::select! {
            res = &mut handle => {
                if let Err(err) = res {
                    tracing::error!(worker_id = %ctx.worker_id, %task_id, error = %err, "task-processing future panicked");
                }
                return true;
            }
            _ = tokio::time::sleep(SHUTDOWN_POLL_INTERVAL) => {
                if !shutdown.is_requested() {
                    continue;
                }
                match tokio::time::timeout(grace_period, &mut handle).await {
                    Ok(res) => {
                        if let Err(err) = res {
                            tracing::error!(worker_id = %ctx.worker_id, %task_id, error = %err, "task-processing future panicked");
                        }
                        return true;
                    }
                    Err(_) => {
                        handle.abort();
                        tracing::warn!(
                            worker_id = %ctx.worker_id, %task_id,
                            "grace period elapsed with task still in flight; exiting, stale sweep will reclaim it"
                        );
                        return false;
                    }
                }
            }
        }
    }
}

/// Processes exactly one claimed task end to end: pre-processing hooks, the
/// splitting gate, the engine call, normalization, and finalization
/// (including parent progress/merge on the child path). Never panics on an
/// engine or I/O failure — those become `finalize_failed` calls instead.
async fn process_claim(ctx: Arc<WorkerContext>, task_id: Uuid) {
    let heartbeat = spawn_heartbeat(ctx.clone(), task_id);

    let task = match ctx.store.get(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::error!(worker_id = %ctx.worker_id, %task_id, "claimed task vanished before processing");
            heartbeat.abort();
            return;
        }
        Err(err) => {
            tracing::error!(worker_id = %ctx.worker_id, %task_id, error = %err, "failed to load claimed task");
            heartbeat.abort();
            return;
        }
    };

    match run_task(&ctx, &task).await {
        Ok(Outcome::BecameParent) => {
            tracing::info!(worker_id = %ctx.worker_id, %task_id, "split into child shards");
        }
        Ok(Outcome::Completed { result_path }) => {
            finalize_success(&ctx, &task, &result_path).await;
        }
        Err(err) => {
            finalize_failure(&ctx, &task, &err.to_string()).await;
        }
    }

    heartbeat.abort();
}

enum Outcome {
    BecameParent,
    Completed { result_path: String },
}

/// Runs the pre-processing hooks, the splitting gate, and (if the task was
/// not split) the engine call plus normalization. Returns the finished
/// result directory on success; the caller finalizes the row either way.
async fn run_task(ctx: &WorkerContext, task: &Task) -> anyhow::Result<Outcome> {
    let work_dir = ctx.work_dir(task.task_id);

    let watermark_removed = maybe_remove_watermark(Path::new(&task.file_path), &work_dir, &task.options).await?;

    let office_guard = maybe_convert_office_to_pdf(&watermark_removed, &work_dir, &task.options).await?;
    let effective_path: PathBuf = office_guard
        .as_ref()
        .map(|g| g.path().to_path_buf())
        .unwrap_or(watermark_removed);

    let mut split_source = task.clone();
    split_source.file_path = effective_path.to_string_lossy().into_owned();
    let splits_dir = ctx.storage.splits_dir(&task.task_id.to_string());
    let child_ids = maybe_split(&ctx.store, &ctx.split, &split_source, &splits_dir).await?;

    if !child_ids.is_empty() {
        for child_id in &child_ids {
            if let Some(child) = ctx.store.get(*child_id).await? {
                ctx.queue.enqueue(child.task_id, child.priority).await.ok();
            }
        }
        return Ok(Outcome::BecameParent);
    }

    let mut options = task.options.clone();
    if task.backend == "paddleocr-vl-vllm" {
        if let Some(endpoint) = &ctx.vllm_endpoint {
            if let Value::Object(map) = &mut options {
                map.insert("paddleocr_vllm_endpoint".to_string(), Value::String(endpoint.clone()));
            }
        }
    }

    let engine = ctx.registry.dispatch(&effective_path, &task.backend)?;
    let result_dir = ctx.storage.result_dir(&task.task_id.to_string());

    engine.parse(&effective_path, &result_dir, &options, ctx.device).await?;

    let uploader: Option<&dyn ImageUploader> = Some(ctx.uploader.as_ref());
    let normalized = normalize(&result_dir, uploader).await?;
    if normalized.images_uploaded {
        ctx.store.set_images_uploaded(task.task_id).await.ok();
    }

    Ok(Outcome::Completed {
        result_path: result_dir.to_string_lossy().into_owned(),
    })
}

async fn finalize_success(ctx: &WorkerContext, task: &Task, result_path: &str) {
    match ctx.store.finalize_completed(task.task_id, &ctx.worker_id, result_path).await {
        Ok(true) => {
            tracing::info!(worker_id = %ctx.worker_id, task_id = %task.task_id, "task completed");
        }
        Ok(false) => {
            tracing::warn!(worker_id = %ctx.worker_id, task_id = %task.task_id, "finalize_completed was a no-op (claim lost)");
            return;
        }
        Err(err) => {
            tracing::error!(worker_id = %ctx.worker_id, task_id = %task.task_id, error = %err, "failed to finalize completed task");
            return;
        }
    }

    let Some(_parent_task_id) = task.parent_task_id else {
        return;
    };

    advance_parent_on_success(ctx, task.task_id).await;
}

async fn advance_parent_on_success(ctx: &WorkerContext, child_task_id: Uuid) {
    let ready_parent = match ctx.store.on_child_completed(child_task_id).await {
        Ok(parent) => parent,
        Err(err) => {
            tracing::error!(task_id = %child_task_id, error = %err, "failed to advance parent progress");
            return;
        }
    };
    let Some(parent_id) = ready_parent else {
        return;
    };

    let parent = match ctx.store.get(parent_id).await {
        Ok(Some(parent)) => parent,
        Ok(None) => {
            tracing::error!(task_id = %parent_id, "ready parent row vanished before merge");
            return;
        }
        Err(err) => {
            tracing::error!(task_id = %parent_id, error = %err, "failed to load parent for merge");
            return;
        }
    };

    if parent.status != TaskStatus::Processing {
        return;
    }

    let uploader: Option<&dyn ImageUploader> = Some(ctx.uploader.as_ref());
    if let Err(err) = merge_ready_parent(&ctx.store, &parent, &ctx.storage, uploader).await {
        tracing::error!(task_id = %parent_id, error = %err, "merge failed");
        ctx.store.finalize_parent_failed(parent_id, &err.to_string()).await.ok();
    } else {
        tracing::info!(task_id = %parent_id, "parent merged and completed");
    }
}

async fn finalize_failure(ctx: &WorkerContext, task: &Task, error_message: &str) {
    tracing::error!(worker_id = %ctx.worker_id, task_id = %task.task_id, error = %error_message, "task failed");
    match ctx.store.finalize_failed(task.task_id, &ctx.worker_id, error_message).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(worker_id = %ctx.worker_id, task_id = %task.task_id, "finalize_failed was a no-op (claim lost)");
            return;
        }
        Err(err) => {
            tracing::error!(worker_id = %ctx.worker_id, task_id = %task.task_id, error = %err, "failed to finalize failed task");
            return;
        }
    }

    if task.parent_task_id.is_some() {
        if let Err(err) = ctx.store.on_child_failed(task.task_id, error_message).await {
            tracing::error!(task_id = %task.task_id, error = %err, "failed to propagate child failure to parent");
        }
    }
}

/// Refreshes the out-of-process queue's claim timestamp for `task_id` at a
/// fraction of the poll interval so a long engine call never ages past the
/// visibility timeout while genuinely still in progress. A no-op on the
/// embedded queue (whose `heartbeat` implementation does nothing), so this
/// is spawned unconditionally rather than branching on which queue is wired
/// in.
fn spawn_heartbeat(ctx: Arc<WorkerContext>, task_id: Uuid) -> tokio::task::JoinHandle<()> {
    let interval = (ctx.poll_interval / 2).max(Duration::from_millis(500));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = ctx.queue.heartbeat(task_id, &ctx.worker_id).await {
                tracing::warn!(worker_id = %ctx.worker_id, %task_id, error = %err, "heartbeat failed");
            }
        }
    })
}
