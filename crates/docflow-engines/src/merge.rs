use std::sync::Arc;

use docflow_core::task::Task;
use docflow_normalizer::{normalize, ImageUploader};
use docflow_store::TaskStore;
use serde_json::Value;
use uuid::Uuid;

/// Recomposes a parent's result from its completed children: concatenates
/// markdown in page order with a delimiter comment between shards, merges
/// structured JSON with page numbers shifted to be global, normalizes the
/// merged directory, finalizes the parent, and deletes the shard PDFs
/// (child result directories are kept for auditability).
pub async fn merge_parent(
    store: &Arc<TaskStore>,
    parent_id: Uuid,
    parent_result_dir: &std::path::Path,
    splits_dir: &std::path::Path,
    uploader: Option<&dyn ImageUploader>,
) -> anyhow::Result<()> {
    let Some((_parent, mut children)) = store.get_with_children(parent_id).await? else {
        anyhow::bail!("parent task {parent_id} not found");
    };
    children.sort_by_key(|c| c.chunk_info().map(|ci| ci.start_page).unwrap_or(u32::MAX));

    tokio::fs::create_dir_all(parent_result_dir).await?;

    let mut markdown = String::new();
    let mut merged_json: Option<Value> = None;
    let mut merged_pages: Vec<Value> = Vec::new();

    for child in &children {
        if child.status != docflow_core::TaskStatus::Completed {
            tracing::warn!(task_id = %child.task_id, "skipping non-completed child during merge");
            continue;
        }
        let Some(chunk) = child.chunk_info() else {
            tracing::warn!(task_id = %child.task_id, "child missing chunk_info, skipping");
            continue;
        };
        let Some(result_path) = &child.result_path else {
            tracing::warn!(task_id = %child.task_id, "completed child has no result_path, skipping");
            continue;
        };

        let child_md_path = std::path::Path::new(result_path).join("result.md");
        if let Ok(text) = tokio::fs::read_to_string(&child_md_path).await {
            if !markdown.is_empty() {
                markdown.push('\n');
            }
            markdown.push_str(&format!("<!-- Pages {}-{} -->\n", chunk.start_page, chunk.end_page));
            markdown.push_str(&text);
            markdown.push('\n');
        } else {
            tracing::warn!(task_id = %child.task_id, "child markdown missing, skipping fragment");
        }

        let child_json_path = std::path::Path::new(result_path).join("result.json");
        if let Ok(raw) = tokio::fs::read_to_string(&child_json_path).await {
            if let Ok(doc) = serde_json::from_str::<Value>(&raw) {
                if let Some(pages) = doc.get("pages").and_then(Value::as_array) {
                    for page in pages {
                        let mut page = page.clone();
                        if let Some(obj) = page.as_object_mut() {
                            if let Some(n) = obj.get("page_number").and_then(Value::as_i64) {
                                obj.insert(
                                    "page_number".to_string(),
                                    Value::from(n + chunk.start_page as i64 - 1),
                                );
                            }
                        }
                        merged_pages.push(page);
                    }
                }
                if merged_json.is_none() {
                    merged_json = Some(doc);
                }
            }
        }
    }

    if children.iter().all(|c| c.status == docflow_core::TaskStatus::Failed) {
        anyhow::bail!("all children failed, parent cannot be merged");
    }

    tokio::fs::write(parent_result_dir.join("result.md"), &markdown).await?;

    if let Some(mut doc) = merged_json {
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("pages".to_string(), Value::Array(merged_pages));
        }
        tokio::fs::write(
            parent_result_dir.join("result.json"),
            serde_json::to_string_pretty(&doc)?,
        )
        .await?;
    }

    normalize(parent_result_dir, uploader).await?;

    store
        .finalize_parent_completed(parent_id, &parent_result_dir.to_string_lossy())
        .await?;

    tokio::fs::remove_dir_all(splits_dir).await.ok();

    Ok(())
}

/// Convenience used by the worker immediately after `on_child_completed`
/// reports the parent is ready: resolves the parent's standard paths and
/// runs the merge.
pub async fn merge_ready_parent(
    store: &Arc<TaskStore>,
    parent: &Task,
    storage: &docflow_core::config::StorageConfig,
    uploader: Option<&dyn ImageUploader>,
) -> anyhow::Result<()> {
    let result_dir = storage.result_dir(&parent.task_id.to_string());
    let splits_dir = storage.splits_dir(&parent.task_id.to_string());
    merge_parent(store, parent.task_id, &result_dir, &splits_dir, uploader).await
}
