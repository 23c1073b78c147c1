//! In-memory storage driver.
//!
//! Backs tests and single-process development. State is shared through the
//! handle's `Arc`, so a test harness can hand the same instance to a gateway
//! and a worker; it does not survive the process.

use crate::{RetrievedDoc, SnapshotRef, Storage, StorageError};
use async_trait::async_trait;
use collab_core::crdt::DocState;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

type Key = (String, String);

/// Map-backed snapshot store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    snapshots: Arc<DashMap<Key, Vec<(String, Vec<u8>)>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(room: &str, docid: &str) -> Key {
        (room.to_string(), docid.to_string())
    }

    /// Number of live references for a room. Test observability.
    #[must_use]
    pub fn reference_count(&self, room: &str, docid: &str) -> usize {
        self.snapshots
            .get(&Self::key(room, docid))
            .map(|blobs| blobs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<SnapshotRef, StorageError> {
        let reference = Uuid::new_v4().to_string();
        self.snapshots
            .entry(Self::key(room, docid))
            .or_default()
            .push((reference.clone(), merged_state.to_vec()));
        Ok(SnapshotRef(reference))
    }

    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError> {
        let Some(blobs) = self.snapshots.get(&Self::key(room, docid)) else {
            return Ok(None);
        };
        if blobs.is_empty() {
            return Ok(None);
        }

        let mut doc = DocState::new();
        let mut references = Vec::with_capacity(blobs.len());
        for (reference, bytes) in blobs.iter() {
            doc.apply_update(bytes).map_err(|source| StorageError::Corrupt {
                reference: reference.clone(),
                source,
            })?;
            references.push(SnapshotRef(reference.clone()));
        }
        Ok(Some(RetrievedDoc { doc, references }))
    }

    async fn delete_references(
        &self,
        room: &str,
        docid: &str,
        refs: &[SnapshotRef],
    ) -> Result<(), StorageError> {
        if let Some(mut blobs) = self.snapshots.get_mut(&Self::key(room, docid)) {
            blobs.retain(|(reference, _)| !refs.iter().any(|r| r.0 == *reference));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), StorageError> {
        self.snapshots.clear();
        Ok(())
    }
}
