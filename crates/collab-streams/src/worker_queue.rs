//! Worker task queue.
//!
//! A single stream of room keys, consumed through the `worker` consumer
//! group. Claiming prefers XAUTOCLAIM so tasks abandoned by a crashed peer
//! (pending longer than the claim TTL) are recovered before new work is
//! taken. A task stays in the pending entry list until acknowledged, which
//! is what makes crash recovery possible at all.

use crate::id::EntryId;
use crate::keys::KeyScheme;
use crate::pool::{RedisPool, RedisPoolError, RedisResult};
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;

/// Consumer group name shared by all workers.
pub const GROUP: &str = "worker";

/// Field carrying the room stream key in each task entry.
const ROOM_FIELD: &str = "room";

/// A claimed compaction task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTask {
    pub id: EntryId,
    /// The room stream key to inspect, as produced by
    /// [`KeyScheme::room_stream`].
    pub room_key: String,
}

/// Client for the worker queue, bound to one logical consumer.
#[derive(Debug, Clone)]
pub struct WorkerQueue {
    pool: RedisPool,
    keys: KeyScheme,
    consumer: String,
    worker_block_ms: u64,
    claim_ttl_ms: u64,
}

impl WorkerQueue {
    #[must_use]
    pub fn new(
        pool: RedisPool,
        keys: KeyScheme,
        consumer: impl Into<String>,
        worker_block_ms: u64,
        claim_ttl_ms: u64,
    ) -> Self {
        Self {
            pool,
            keys,
            consumer: consumer.into(),
            worker_block_ms,
            claim_ttl_ms,
        }
    }

    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Create the consumer group if it does not exist yet. Safe to call from
    /// every worker at startup.
    pub async fn ensure_group(&self) -> RedisResult<()> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(&key, GROUP, "0").await;
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Schedule a room for inspection.
    pub async fn enqueue(&self, room_key: &str) -> RedisResult<EntryId> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        let id: String = conn.xadd(&key, "*", &[(ROOM_FIELD, room_key)]).await?;
        id.parse()
            .map_err(|_| RedisPoolError::Entry(format!("xadd returned id {id}")))
    }

    /// Claim the next task: first reclaim anything another consumer
    /// abandoned past the claim TTL, then block for fresh work up to
    /// `worker_block_ms`. Returns `None` when neither yields a task.
    pub async fn claim_next(&self) -> RedisResult<Option<WorkerTask>> {
        if let Some(task) = self.reclaim_stale().await? {
            return Ok(Some(task));
        }
        self.read_fresh().await
    }

    async fn reclaim_stale(&self) -> RedisResult<Option<WorkerTask>> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &key,
                GROUP,
                &self.consumer,
                self.claim_ttl_ms,
                "0-0",
                StreamAutoClaimOptions::default().count(1),
            )
            .await?;

        let Some(entry) = reply.claimed.first() else {
            return Ok(None);
        };
        let task = parse_task(entry)?;
        tracing::info!(
            task_id = %task.id,
            room_key = %task.room_key,
            consumer = %self.consumer,
            "reclaimed stale worker task"
        );
        Ok(Some(task))
    }

    async fn read_fresh(&self) -> RedisResult<Option<WorkerTask>> {
        let key = self.keys.worker_queue();
        let options = StreamReadOptions::default()
            .group(GROUP, &self.consumer)
            .block(self.worker_block_ms as usize)
            .count(1);

        let mut conn = self.pool.get().await?;
        let reply: Option<StreamReadReply> =
            conn.xread_options(&[&key], &[">"], &options).await?;

        let Some(reply) = reply else {
            return Ok(None);
        };
        match reply.keys.first().and_then(|stream| stream.ids.first()) {
            Some(entry) => Ok(Some(parse_task(entry)?)),
            None => Ok(None),
        }
    }

    /// Whether the task is still assigned to `self.consumer`. A compaction
    /// that slept past the claim TTL checks this before writing anything.
    pub async fn still_claimed(&self, id: EntryId) -> RedisResult<bool> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&key, GROUP, id.to_string(), id.to_string(), 1)
            .await?;
        Ok(reply
            .ids
            .first()
            .is_some_and(|pending| pending.consumer == self.consumer))
    }

    /// Acknowledge and remove a finished task.
    pub async fn ack(&self, id: EntryId) -> RedisResult<()> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.xack(&key, GROUP, &[id.to_string()]).await?;
        let _: i64 = conn.xdel(&key, &[id.to_string()]).await?;
        Ok(())
    }

    /// Number of entries in the queue stream. Test observability.
    pub async fn len(&self) -> RedisResult<usize> {
        let key = self.keys.worker_queue();
        let mut conn = self.pool.get().await?;
        Ok(conn.xlen(&key).await?)
    }
}

fn parse_task(entry: &redis::streams::StreamId) -> RedisResult<WorkerTask> {
    let id: EntryId = entry
        .id
        .parse()
        .map_err(|_| RedisPoolError::Entry(format!("unparseable task id {}", entry.id)))?;
    let room_key: String = entry
        .get(ROOM_FIELD)
        .ok_or_else(|| RedisPoolError::Entry(format!("task {id} missing room field")))?;
    Ok(WorkerTask { id, room_key })
}
