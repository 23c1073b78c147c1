//! # collab-storage
//!
//! The snapshot storage contract and its reference drivers.
//!
//! A snapshot is the merge of a room's history at some point in time, stored
//! under an opaque [`SnapshotRef`]. Several references may be live at once
//! (concurrent compactions); readers merge them all, writers eventually
//! delete the losers. That merge-on-read pattern is what keeps concurrent
//! persists from corrupting anything.

mod error;
mod fs;
mod memory;

pub use error::StorageError;
pub use fs::FsStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use collab_core::crdt::DocState;
use std::sync::Arc;

/// Opaque handle to one persisted snapshot blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotRef(pub String);

impl std::fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document reconstructed from storage: the merge of every live snapshot,
/// plus the references that produced it so callers can delete superseded
/// ones after persisting something fresher.
#[derive(Debug)]
pub struct RetrievedDoc {
    pub doc: DocState,
    pub references: Vec<SnapshotRef>,
}

/// Snapshot storage capability contract.
///
/// All operations are idempotent on the `(room, docid)` key space. Drivers
/// must make `persist_doc` durable before returning.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a new snapshot blob and return its reference.
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<SnapshotRef, StorageError>;

    /// Read and merge all live snapshots. `None` when the room has never
    /// been persisted. An undecodable snapshot surfaces as
    /// [`StorageError::Corrupt`] so the worker can quarantine the room.
    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError>;

    /// Cheap path for the state vector, when the driver has one. The default
    /// derives it from [`Storage::retrieve_doc`].
    async fn retrieve_state_vector(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .retrieve_doc(room, docid)
            .await?
            .map(|r| r.doc.state_vector()))
    }

    /// Best-effort deletion of superseded references. Partial failure is
    /// logged by the driver and healed by the next compaction.
    async fn delete_references(
        &self,
        room: &str,
        docid: &str,
        refs: &[SnapshotRef],
    ) -> Result<(), StorageError>;

    /// Write a companion marker object flagging the room as quarantined.
    async fn quarantine(&self, room: &str, docid: &str, reason: &str) -> Result<(), StorageError> {
        self.persist_doc(room, &format!("{docid}.quarantine"), reason.as_bytes())
            .await
            .map(|_| ())
    }

    /// Release driver resources.
    async fn destroy(&self) -> Result<(), StorageError>;
}

/// Select and build a driver by name (the `STORAGE` environment key).
///
/// # Errors
/// Returns an error for unknown driver names or driver init failures.
pub async fn from_driver_name(
    driver: &str,
    fs_root: &str,
) -> Result<Arc<dyn Storage>, StorageError> {
    match driver {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "fs" => Ok(Arc::new(FsStorage::new(fs_root).await?)),
        other => Err(StorageError::UnknownDriver(other.to_string())),
    }
}
