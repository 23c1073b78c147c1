//! The compaction loop.
//!
//! For each claimed room: wait for the stream tail to age past the drain
//! interval, rebuild the document (snapshot merge + stream replay), persist
//! a fresh snapshot, delete the superseded references, trim the stream up to
//! the recorded tail and delete it when empty. Every step up to the ack is
//! idempotent, so a crash anywhere simply leaves the task in the pending
//! list for a peer to reclaim and re-run.

use collab_api::{ApiError, DocApi};
use collab_common::metrics::SharedMetrics;
use collab_storage::{SnapshotRef, Storage, StorageError};
use collab_streams::{
    EntryId, KeyScheme, RedisPoolError, RoomStreamClient, WorkerQueue, WorkerTask,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Delay before retrying after a failed claim cycle.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Compaction failures. Anything that escapes [`Compactor::process`] leaves
/// the task pending for reclaim.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Redis(#[from] RedisPoolError),
}

/// What a single task ended as.
#[derive(Debug)]
pub enum CompactionOutcome {
    /// Stream empty or task unparseable; acknowledged as a no-op.
    CleanRoom,
    /// Snapshot written, stream trimmed.
    Compacted {
        reference: SnapshotRef,
        /// Whether the stream key was deleted (emptied completely).
        stream_deleted: bool,
    },
    /// The claim TTL expired during the drain wait and another consumer
    /// took the task; abort without acknowledging.
    Stolen,
    /// Undecodable snapshot; marker written, references kept, task
    /// acknowledged so it does not storm the reclaim path.
    Quarantined,
}

/// One worker's compaction engine.
pub struct Compactor {
    api: Arc<DocApi>,
    storage: Arc<dyn Storage>,
    streams: RoomStreamClient,
    queue: WorkerQueue,
    keys: KeyScheme,
    min_message_lifetime: Duration,
    metrics: SharedMetrics,
}

impl Compactor {
    #[must_use]
    pub fn new(
        api: Arc<DocApi>,
        storage: Arc<dyn Storage>,
        streams: RoomStreamClient,
        queue: WorkerQueue,
        keys: KeyScheme,
        min_message_lifetime: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            api,
            storage,
            streams,
            queue,
            keys,
            min_message_lifetime,
            metrics,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &WorkerQueue {
        &self.queue
    }

    /// Claim and process tasks until `shutdown` flips. An in-flight
    /// compaction finishes before the loop exits.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = %self.queue.consumer(), "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                claimed = self.queue.claim_next() => match claimed {
                    Ok(Some(task)) => self.handle_task(task).await,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "task claim failed, backing off");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                },
            }
        }
        tracing::info!(consumer = %self.queue.consumer(), "worker stopped");
    }

    async fn handle_task(&self, task: WorkerTask) {
        match self.process(&task).await {
            Ok(CompactionOutcome::Stolen) => {
                tracing::debug!(
                    task_id = %task.id,
                    room_key = %task.room_key,
                    "task stolen during drain wait"
                );
            }
            Ok(outcome) => {
                if let CompactionOutcome::Compacted {
                    reference,
                    stream_deleted,
                } = &outcome
                {
                    tracing::info!(
                        room_key = %task.room_key,
                        reference = %reference,
                        stream_deleted = stream_deleted,
                        "room compacted"
                    );
                }
                if let Err(e) = self.queue.ack(task.id).await {
                    tracing::warn!(task_id = %task.id, error = %e, "task ack failed");
                }
            }
            Err(e) => {
                // Left in the pending entry list; a peer reclaims it after
                // the claim TTL.
                tracing::error!(
                    task_id = %task.id,
                    room_key = %task.room_key,
                    error = %e,
                    "compaction failed, task left for reclaim"
                );
            }
        }
    }

    /// Run one compaction pass over a claimed task.
    pub async fn process(&self, task: &WorkerTask) -> Result<CompactionOutcome, WorkerError> {
        let Some(room) = self.keys.parse_room_stream(&task.room_key) else {
            tracing::warn!(room_key = %task.room_key, "unparseable task payload, dropping");
            return Ok(CompactionOutcome::CleanRoom);
        };

        if self.streams.len(&room).await? == 0 {
            return Ok(CompactionOutcome::CleanRoom);
        }
        let Some(tail) = self.streams.tail_id(&room).await? else {
            return Ok(CompactionOutcome::CleanRoom);
        };

        // Let in-flight publishers and subscribers drain past the tail
        // before anything is removed from the stream.
        let lifetime_ms = self.min_message_lifetime.as_millis() as u64;
        let age_ms = tail.age_ms(unix_millis());
        if age_ms < lifetime_ms {
            tokio::time::sleep(Duration::from_millis(lifetime_ms - age_ms)).await;
            if !self.queue.still_claimed(task.id).await? {
                return Ok(CompactionOutcome::Stolen);
            }
        }

        let view = match self.api.get_doc(&room).await {
            Ok(view) => view,
            Err(e) if e.is_corrupt() => {
                self.storage
                    .quarantine(room.room(), room.docid(), &e.to_string())
                    .await?;
                tracing::error!(
                    room = %room,
                    error = %e,
                    "room quarantined: snapshot undecodable, references kept"
                );
                self.metrics.incr_counter("compactions.quarantined", 1);
                return Ok(CompactionOutcome::Quarantined);
            }
            Err(e) => return Err(e.into()),
        };

        let merged = view.doc.encode_update();
        let reference = self
            .storage
            .persist_doc(room.room(), room.docid(), &merged)
            .await?;
        self.metrics.incr_counter("compactions.completed", 1);

        if !view.references.is_empty() {
            self.storage
                .delete_references(room.room(), room.docid(), &view.references)
                .await?;
        }

        self.trim_and_maybe_delete(task, &room, tail).await?;

        let stream_deleted = !self.streams.exists(&room).await?;
        Ok(CompactionOutcome::Compacted {
            reference,
            stream_deleted,
        })
    }

    async fn trim_and_maybe_delete(
        &self,
        task: &WorkerTask,
        room: &collab_core::room::RoomId,
        tail: EntryId,
    ) -> Result<(), WorkerError> {
        self.streams.trim_below(room, tail.next()).await?;
        let deleted = self.streams.delete_if_empty(room).await?;
        if !deleted {
            // Entries landed past the recorded tail while we worked; the
            // room went Draining -> Active and needs another pass.
            self.queue.enqueue(&task.room_key).await?;
            tracing::debug!(room = %room, "stream still active after trim, re-enqueued");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("consumer", &self.queue.consumer())
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
