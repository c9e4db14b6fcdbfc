//! The Task Store and Priority Queue: durable metadata plus prioritized,
//! claim-tracked dequeue, realized either entirely inside SQLite (the
//! embedded queue) or accelerated by an out-of-process Redis sorted set.

mod queue;
mod row;
mod store;

pub use queue::{build_queue, EmbeddedQueue, PriorityQueue, RedisQueue};
pub use store::{QueueStats, TaskStore};

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::task::NewTask;
    use docflow_core::TaskStatus;
    use serde_json::json;
    use std::time::Duration;

    fn new_task(priority: i64) -> NewTask {
        NewTask {
            file_name: "a.pdf".into(),
            file_path: "/tmp/a.pdf".into(),
            backend: "pipeline".into(),
            options: json!({}),
            priority,
            user_id: Some("u1".into()),
        }
    }

    #[tokio::test]
    async fn claim_next_respects_priority_then_fifo() {
        let store = TaskStore::connect_in_memory().await.unwrap();
        let low1 = store.create(new_task(0)).await.unwrap();
        let high = store.create(new_task(10)).await.unwrap();
        let low2 = store.create(new_task(0)).await.unwrap();

        let first = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(first.task_id, high);

        let second = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(second.task_id, low1);

        let third = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(third.task_id, low2);

        assert!(store.claim_next("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = std::sync::Arc::new(TaskStore::connect_in_memory().await.unwrap());
        store.create(new_task(0)).await.unwrap();

        let a = store.claim_next("w1").await.unwrap();
        let b = store.claim_next("w2").await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn finalize_requires_matching_worker() {
        let store = TaskStore::connect_in_memory().await.unwrap();
        let id = store.create(new_task(0)).await.unwrap();
        let task = store.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(task.task_id, id);

        assert!(!store.finalize_completed(id, "w2", "/out").await.unwrap());
        assert!(store.finalize_completed(id, "w1", "/out").await.unwrap());

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Completed);
        assert_eq!(row.result_path.as_deref(), Some("/out"));
    }

    #[tokio::test]
    async fn cancel_only_allowed_while_pending() {
        let store = TaskStore::connect_in_memory().await.unwrap();
        let id = store.create(new_task(0)).await.unwrap();
        assert!(store.cancel(id).await.unwrap());

        let id2 = store.create(new_task(0)).await.unwrap();
        store.claim_next("w1").await.unwrap();
        assert!(!store.cancel(id2).await.unwrap());
    }

    #[tokio::test]
    async fn reset_stale_requeues_and_increments_retry() {
        let store = TaskStore::connect_in_memory().await.unwrap();
        let id = store.create(new_task(0)).await.unwrap();
        store.claim_next("w1").await.unwrap();

        let reclaimed = store.reset_stale(Duration::from_secs(0)).await.unwrap();
        assert_eq!(reclaimed, vec![id]);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.worker_id.is_none());
    }

    #[tokio::test]
    async fn parent_completes_only_when_all_children_complete() {
        let store = TaskStore::connect_in_memory().await.unwrap();
        let parent = store.create(new_task(0)).await.unwrap();
        store.convert_to_parent(parent, 2).await.unwrap();

        let parent_task = store.get(parent).await.unwrap().unwrap();
        let child_a = store.create_child(parent, new_task(0)).await.unwrap();
        let child_b = store.create_child(parent, new_task(0)).await.unwrap();
        let _ = parent_task;

        assert!(store.on_child_completed(child_a).await.unwrap().is_none());
        let ready = store.on_child_completed(child_b).await.unwrap();
        assert_eq!(ready, Some(parent));
    }
}
