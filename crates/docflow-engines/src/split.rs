use std::path::{Path, PathBuf};
use std::sync::Arc;

use docflow_core::config::SplitConfig;
use docflow_core::task::{ChunkInfo, NewTask, Task};
use docflow_store::TaskStore;
use uuid::Uuid;

pub fn page_count(pdf_path: &Path) -> anyhow::Result<u32> {
    let doc = lopdf::Document::load(pdf_path)?;
    Ok(doc.get_pages().len() as u32)
}

/// Writes a single shard PDF containing only `start_page..=end_page`
/// (1-indexed, inclusive) of `source`, into `dest`.
fn write_shard(source: &lopdf::Document, start_page: u32, end_page: u32, dest: &Path) -> anyhow::Result<()> {
    let mut shard = source.clone();
    let pages = shard.get_pages();
    let to_delete: Vec<u32> = pages
        .keys()
        .copied()
        .filter(|&n| n < start_page || n > end_page)
        .collect();
    shard.delete_pages(&to_delete);
    shard.save(dest)?;
    Ok(())
}

/// The splitting gate: if the parent PDF exceeds the configured threshold,
/// converts the task row to a parent, writes one shard PDF per chunk under
/// `splits/<task_id>/`, and creates a pending child row per shard. Returns
/// the created child ids, or an empty vec if splitting was not triggered.
pub async fn maybe_split(
    store: &Arc<TaskStore>,
    split_config: &SplitConfig,
    task: &Task,
    splits_dir: &Path,
) -> anyhow::Result<Vec<Uuid>> {
    if !task.file_path.ends_with(".pdf") {
        return Ok(Vec::new());
    }

    let total_pages = page_count(Path::new(&task.file_path))?;
    if !split_config.should_split(total_pages) {
        return Ok(Vec::new());
    }

    let shard_count = split_config.shard_count(total_pages);
    tokio::fs::create_dir_all(splits_dir).await?;

    let source = lopdf::Document::load(&task.file_path)?;
    store.convert_to_parent(task.task_id, shard_count as i64).await?;

    let mut child_ids = Vec::with_capacity(shard_count as usize);
    for i in 0..shard_count {
        let start_page = i * split_config.pdf_split_chunk_size + 1;
        let end_page = ((i + 1) * split_config.pdf_split_chunk_size).min(total_pages);
        let chunk = ChunkInfo {
            start_page,
            end_page,
            page_count: end_page - start_page + 1,
        };

        let shard_path: PathBuf = splits_dir.join(format!("shard_{start_page:06}_{end_page:06}.pdf"));
        write_shard(&source, start_page, end_page, &shard_path)?;

        let new_task = NewTask::child_of(task, chunk, shard_path.to_string_lossy().into_owned());
        let child_id = store.create_child(task.task_id, new_task).await?;
        child_ids.push(child_id);
    }

    Ok(child_ids)
}
