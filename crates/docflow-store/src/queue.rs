use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::store::{QueueStats, TaskStore};

const QUEUE_KEY: &str = "docflow:queue";
const CLAIMS_KEY: &str = "docflow:claims";
/// Scales priority far enough above any plausible timestamp delta that
/// priority always dominates the sort; mirrors the original scoring scheme.
const PRIORITY_SCALE: f64 = 1e10;

#[async_trait]
pub trait PriorityQueue: Send + Sync {
    async fn enqueue(&self, task_id: Uuid, priority: i64) -> anyhow::Result<()>;
    async fn remove(&self, task_id: Uuid) -> anyhow::Result<()>;
    /// Blocks up to `timeout` for a task id to become available. Returns
    /// None on timeout, not an error — an empty queue is normal.
    async fn dequeue(&self, timeout: Duration) -> anyhow::Result<Option<Uuid>>;
    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> anyhow::Result<()>;
    /// Returns ids whose claim has aged past `visibility_timeout`, already
    /// removed from the claim map and re-added to the pending set.
    async fn recover_stale(&self, visibility_timeout: Duration) -> anyhow::Result<Vec<Uuid>>;
    async fn mark_claimed(&self, task_id: Uuid, worker_id: &str) -> anyhow::Result<()>;
    async fn stats(&self) -> anyhow::Result<QueueStats>;
}

/// The store is the queue: `dequeue` polls `claim_next` directly. No
/// separate claim-tracking structure exists because `reset_stale` on the
/// store already recovers stuck rows.
pub struct EmbeddedQueue {
    store: Arc<TaskStore>,
    worker_id: String,
    poll_interval: Duration,
}

impl EmbeddedQueue {
    pub fn new(store: Arc<TaskStore>, worker_id: String, poll_interval: Duration) -> Self {
        Self {
            store,
            worker_id,
            poll_interval,
        }
    }
}

#[async_trait]
impl PriorityQueue for EmbeddedQueue {
    async fn enqueue(&self, _task_id: Uuid, _priority: i64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _task_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> anyhow::Result<Option<Uuid>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.store.claim_next(&self.worker_id).await? {
                return Ok(Some(task.task_id));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn heartbeat(&self, _task_id: Uuid, _worker_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn recover_stale(&self, visibility_timeout: Duration) -> anyhow::Result<Vec<Uuid>> {
        self.store.reset_stale(visibility_timeout).await
    }

    async fn mark_claimed(&self, _task_id: Uuid, _worker_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stats(&self) -> anyhow::Result<QueueStats> {
        self.store.queue_stats().await
    }
}

/// Redis-sorted-set realization. `ZADD` with `score = -priority*1e10 +
/// timestamp` puts the highest-priority, oldest-first task at the minimum
/// score, so `BZPOPMIN` pops exactly the task the embedded SQL ORDER BY
/// would have chosen. A parallel hash tracks `(task_id -> worker_id,
/// claimed_at)` so a periodic sweep can requeue abandoned claims.
///
/// Popping a member off the sorted set only means "no other caller will
/// pop this same member again" — it does not by itself move the task row
/// to `processing`. `dequeue` closes that gap itself: the store's CAS is
/// still the source of truth, so a popped id whose row was cancelled (or
/// claimed through some other path) in the meantime is silently dropped
/// and the loop tries again, exactly as the embedded queue's own retry
/// does.
pub struct RedisQueue {
    client: redis::Client,
    store: Arc<TaskStore>,
    worker_id: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, store: Arc<TaskStore>, worker_id: String) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { client, store, worker_id })
    }

    fn score(priority: i64, timestamp: f64) -> f64 {
        (-(priority as f64)) * PRIORITY_SCALE + timestamp
    }
}

#[async_trait]
impl PriorityQueue for RedisQueue {
    async fn enqueue(&self, task_id: Uuid, priority: i64) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let score = Self::score(priority, Utc::now().timestamp_millis() as f64);
        conn.zadd::<_, _, _, ()>(QUEUE_KEY, task_id.to_string(), score)
            .await?;
        Ok(())
    }

    async fn remove(&self, task_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.zrem::<_, _, ()>(QUEUE_KEY, task_id.to_string()).await?;
        conn.hdel::<_, _, ()>(CLAIMS_KEY, task_id.to_string()).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> anyhow::Result<Option<Uuid>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let popped: Option<(String, String, f64)> =
                conn.bzpopmin(QUEUE_KEY, remaining.as_secs_f64()).await?;
            let Some((_key, member, _score)) = popped else {
                return Ok(None);
            };
            let task_id = Uuid::parse_str(&member)?;
            match self.store.try_claim(task_id, &self.worker_id).await? {
                Some(task) => {
                    self.mark_claimed(task.task_id, &self.worker_id).await?;
                    return Ok(Some(task.task_id));
                }
                None => continue,
            }
        }
    }

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> anyhow::Result<()> {
        self.mark_claimed(task_id, worker_id).await
    }

    async fn mark_claimed(&self, task_id: Uuid, worker_id: &str) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = format!("{worker_id}|{}", Utc::now().timestamp_millis());
        conn.hset::<_, _, _, ()>(CLAIMS_KEY, task_id.to_string(), value)
            .await?;
        Ok(())
    }

    /// A claim aging past `visibility_timeout` only tells us the *queue*
    /// thinks the task is abandoned; the Task Store row is the source of
    /// truth and must be brought back to `pending` (with `retry_count`
    /// bumped) the same way `EmbeddedQueue::recover_stale` does via
    /// `TaskStore::reset_stale`. A claim whose row already left
    /// `processing` through some other path (finalized, cancelled) is
    /// dropped from the claim hash without being re-queued.
    async fn recover_stale(&self, visibility_timeout: Duration) -> anyhow::Result<Vec<Uuid>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let claims: std::collections::HashMap<String, String> =
            conn.hgetall(CLAIMS_KEY).await?;
        let now = Utc::now().timestamp_millis();
        let mut recovered = Vec::new();
        for (task_id_str, value) in claims {
            let Some((_worker, claimed_at_str)) = value.split_once('|') else {
                continue;
            };
            let Ok(claimed_at) = claimed_at_str.parse::<i64>() else {
                continue;
            };
            if now - claimed_at > visibility_timeout.as_millis() as i64 {
                let task_id = Uuid::parse_str(&task_id_str)?;
                conn.hdel::<_, _, ()>(CLAIMS_KEY, task_id_str.clone()).await?;

                if !self.store.reset_task_to_pending(task_id).await? {
                    continue;
                }

                let score = Self::score(0, now as f64);
                conn.zadd::<_, _, _, ()>(QUEUE_KEY, task_id_str, score).await?;
                recovered.push(task_id);
            }
        }
        Ok(recovered)
    }

    async fn stats(&self) -> anyhow::Result<QueueStats> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pending: i64 = conn.zcard(QUEUE_KEY).await?;
        let processing: i64 = conn.hlen(CLAIMS_KEY).await?;
        Ok(QueueStats {
            pending,
            processing,
            ..Default::default()
        })
    }
}

/// Attempts to connect to Redis; on any failure, logs a warning and falls
/// back to the embedded queue rather than failing worker startup.
pub async fn build_queue(
    store: Arc<TaskStore>,
    worker_id: String,
    poll_interval: Duration,
    redis: &docflow_core::config::RedisConfig,
) -> Arc<dyn PriorityQueue> {
    if !redis.redis_queue_enabled {
        return Arc::new(EmbeddedQueue::new(store, worker_id, poll_interval));
    }
    match RedisQueue::connect(&redis.connection_url(), store.clone(), worker_id.clone()).await {
        Ok(q) => {
            tracing::info!("connected to redis priority queue");
            Arc::new(q)
        }
        Err(err) => {
            tracing::warn!(error = %err, "redis queue unavailable, falling back to embedded queue");
            Arc::new(EmbeddedQueue::new(store, worker_id, poll_interval))
        }
    }
}
