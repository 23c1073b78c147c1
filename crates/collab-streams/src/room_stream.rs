//! Room stream client.
//!
//! One Redis stream per room carries its updates in publish order. The
//! gateway reads all of its subscribed rooms through a single blocking
//! XREAD; the worker reads whole streams with XRANGE and trims them after
//! compaction.

use crate::id::EntryId;
use crate::keys::KeyScheme;
use crate::pool::{RedisPool, RedisPoolError, RedisResult};
use collab_core::room::RoomId;
use redis::streams::{StreamMaxlen, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

/// Field name carrying the update payload in each entry.
const PAYLOAD_FIELD: &str = "m";

/// Trim hint passed with every XADD; real trimming authority is the worker.
const MAXLEN_HINT: usize = 10_000;

/// One `(id, payload)` pair read from a room stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEntry {
    pub id: EntryId,
    pub payload: Vec<u8>,
}

/// Entries read from one stream key, in ID order.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub key: String,
    pub entries: Vec<RoomEntry>,
}

/// Client for per-room streams.
#[derive(Debug, Clone)]
pub struct RoomStreamClient {
    pool: RedisPool,
    keys: KeyScheme,
    read_block_ms: u64,
}

impl RoomStreamClient {
    #[must_use]
    pub fn new(pool: RedisPool, keys: KeyScheme, read_block_ms: u64) -> Self {
        Self {
            pool,
            keys,
            read_block_ms,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// Append one update to a room's stream, creating the stream if absent.
    pub async fn publish(&self, room: &RoomId, payload: &[u8]) -> RedisResult<EntryId> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        let id: String = conn
            .xadd_maxlen(
                &key,
                StreamMaxlen::Approx(MAXLEN_HINT),
                "*",
                &[(PAYLOAD_FIELD, payload)],
            )
            .await?;
        id.parse()
            .map_err(|_| RedisPoolError::Entry(format!("xadd returned id {id}")))
    }

    /// Read new entries across all subscribed rooms with one blocking XREAD.
    /// `cursors` maps stream key to the last delivered ID. Returns an empty
    /// vec on timeout. Per-stream entry order is preserved.
    pub async fn read_rooms(&self, cursors: &[(String, EntryId)]) -> RedisResult<Vec<StreamBatch>> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<&str> = cursors.iter().map(|(k, _)| k.as_str()).collect();
        let ids: Vec<String> = cursors.iter().map(|(_, id)| id.to_string()).collect();

        let options = StreamReadOptions::default()
            .block(self.read_block_ms as usize)
            .count(1024);

        let mut conn = self.pool.get().await?;
        let reply: Option<StreamReadReply> = conn.xread_options(&keys, &ids, &options).await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut batches = Vec::with_capacity(reply.keys.len());
        for stream in reply.keys {
            let mut entries = Vec::with_capacity(stream.ids.len());
            for entry in stream.ids {
                entries.push(parse_entry(&entry)?);
            }
            batches.push(StreamBatch {
                key: stream.key,
                entries,
            });
        }
        Ok(batches)
    }

    /// Read a room's entire stream (`XRANGE - +`).
    pub async fn range_all(&self, room: &RoomId) -> RedisResult<Vec<RoomEntry>> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        let reply: StreamRangeReply = conn.xrange_all(&key).await?;
        reply.ids.iter().map(parse_entry).collect()
    }

    /// The ID of the newest entry, if any (`XREVRANGE + - COUNT 1`).
    pub async fn tail_id(&self, room: &RoomId) -> RedisResult<Option<EntryId>> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        let reply: StreamRangeReply = conn.xrevrange_count(&key, "+", "-", 1).await?;
        match reply.ids.first() {
            Some(entry) => Ok(Some(parse_id(&entry.id)?)),
            None => Ok(None),
        }
    }

    /// Number of entries in a room's stream.
    pub async fn len(&self, room: &RoomId) -> RedisResult<usize> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        Ok(conn.xlen(&key).await?)
    }

    /// Remove all entries with ID below `min_id` (`XTRIM MINID`). The typed
    /// command layer has no MINID strategy, so this goes through `cmd`.
    pub async fn trim_below(&self, room: &RoomId, min_id: EntryId) -> RedisResult<()> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        redis::cmd("XTRIM")
            .arg(&key)
            .arg("MINID")
            .arg(min_id.to_string())
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    /// Delete the stream key if, and only if, it is empty. The length check
    /// and the delete run as one server-side script so a concurrent publish
    /// can never be lost: it lands either before the check (stream stays) or
    /// after the delete (XADD recreates the stream).
    pub async fn delete_if_empty(&self, room: &RoomId) -> RedisResult<bool> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        let script = redis::Script::new(
            r#"
            if redis.call('XLEN', KEYS[1]) == 0 then
                redis.call('DEL', KEYS[1])
                return 1
            end
            return 0
            "#,
        );
        let deleted: i64 = script.key(&key).invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }

    /// Whether the stream key currently exists.
    pub async fn exists(&self, room: &RoomId) -> RedisResult<bool> {
        let key = self.keys.room_stream(room);
        let mut conn = self.pool.get().await?;
        Ok(conn.exists(&key).await?)
    }
}

fn parse_id(raw: &str) -> RedisResult<EntryId> {
    raw.parse()
        .map_err(|_| RedisPoolError::Entry(format!("unparseable stream id {raw}")))
}

fn parse_entry(entry: &redis::streams::StreamId) -> RedisResult<RoomEntry> {
    let id = parse_id(&entry.id)?;
    let payload: Vec<u8> = entry
        .get(PAYLOAD_FIELD)
        .ok_or_else(|| RedisPoolError::Entry(format!("entry {id} missing payload field")))?;
    Ok(RoomEntry { id, payload })
}
