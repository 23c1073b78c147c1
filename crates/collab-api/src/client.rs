//! The document API client.

use crate::queued::QueuedCache;
use collab_core::crdt::{CrdtError, DocState};
use collab_core::room::RoomId;
use collab_storage::{SnapshotRef, Storage, StorageError};
use collab_streams::{EntryId, RedisPoolError, RoomStreamClient, WorkerQueue};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors from document operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Redis(#[from] RedisPoolError),

    #[error("rejected update: {0}")]
    InvalidUpdate(#[from] CrdtError),
}

impl ApiError {
    /// Whether the failure is a quarantinable data invariant violation
    /// rather than a transient one.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_corrupt())
    }
}

/// A room's materialized document: snapshot merge plus stream replay.
pub struct DocView {
    pub doc: DocState,
    /// The snapshot references merged into `doc`; a compaction that persists
    /// something fresher deletes exactly these.
    pub references: Vec<SnapshotRef>,
    /// ID of the newest stream entry replayed into `doc`, if any.
    pub last_id: Option<EntryId>,
}

/// Library entry point for reading and writing documents. Embedded in the
/// gateway and the worker; usable standalone.
pub struct DocApi {
    storage: Arc<dyn Storage>,
    streams: RoomStreamClient,
    queue: WorkerQueue,
    recently_queued: QueuedCache,
}

impl DocApi {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        streams: RoomStreamClient,
        queue: WorkerQueue,
        min_message_lifetime: Duration,
    ) -> Self {
        Self {
            storage,
            streams,
            queue,
            recently_queued: QueuedCache::new(min_message_lifetime),
        }
    }

    #[must_use]
    pub fn streams(&self) -> &RoomStreamClient {
        &self.streams
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Rebuild a room's document: retrieve and merge the live snapshots,
    /// then replay the stream tail on top.
    pub async fn get_doc(&self, room: &RoomId) -> Result<DocView, ApiError> {
        let retrieved = self
            .storage
            .retrieve_doc(room.room(), room.docid())
            .await?;
        let (mut doc, references) = match retrieved {
            Some(r) => (r.doc, r.references),
            None => (DocState::new(), Vec::new()),
        };

        let entries = self.streams.range_all(room).await?;
        let last_id = entries.last().map(|e| e.id);
        doc.merge_into(entries.iter().map(|e| e.payload.as_slice()));

        Ok(DocView {
            doc,
            references,
            last_id,
        })
    }

    /// The room's state vector. Storage may answer from a cheaper path; the
    /// result can lag the stream tail, which only enlarges the diff a caller
    /// computes against it.
    pub async fn get_state_vector(&self, room: &RoomId) -> Result<Vec<u8>, ApiError> {
        if let Some(sv) = self
            .storage
            .retrieve_state_vector(room.room(), room.docid())
            .await?
        {
            return Ok(sv);
        }
        Ok(self.get_doc(room).await?.doc.state_vector())
    }

    /// Publish one update to the room's stream and schedule compaction if
    /// the room was previously clean.
    pub async fn add_update(&self, room: &RoomId, update: &[u8]) -> Result<EntryId, ApiError> {
        DocState::validate_update(update)?;

        let id = self.streams.publish(room, update).await?;

        if self.recently_queued.should_enqueue(room, Instant::now()) {
            let room_key = self.streams.keys().room_stream(room);
            self.queue.enqueue(&room_key).await?;
            tracing::debug!(room = %room, "worker task enqueued");
        }

        Ok(id)
    }
}

impl std::fmt::Debug for DocApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocApi").finish_non_exhaustive()
    }
}
