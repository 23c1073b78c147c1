//! Filesystem storage driver.
//!
//! Reference production driver; object-store drivers implement the same
//! contract. Layout: `{root}/{urlencode(room)}/{urlencode(docid)}/{uuid}`.
//! Blobs are written to a temporary name and fsynced before the rename, so
//! a reference never points at a partial snapshot.

use crate::{RetrievedDoc, SnapshotRef, Storage, StorageError};
use async_trait::async_trait;
use collab_core::crdt::DocState;
use collab_core::room::encode_component;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Directory-tree snapshot store.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create the driver, ensuring the root directory exists.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn doc_dir(&self, room: &str, docid: &str) -> PathBuf {
        self.root
            .join(encode_component(room))
            .join(encode_component(docid))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<SnapshotRef, StorageError> {
        let dir = self.doc_dir(room, docid);
        tokio::fs::create_dir_all(&dir).await?;

        let name = Uuid::new_v4().to_string();
        let tmp = dir.join(format!(".{name}.tmp"));
        let finished = dir.join(&name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(merged_state).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &finished).await?;

        tracing::debug!(room = %room, docid = %docid, reference = %name, "snapshot persisted");
        Ok(SnapshotRef(name))
    }

    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError> {
        let dir = self.doc_dir(room, docid);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip in-flight temporaries from a concurrent persist.
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Ok(None);
        }
        names.sort();

        let mut doc = DocState::new();
        let mut references = Vec::with_capacity(names.len());
        for name in names {
            let bytes = tokio::fs::read(dir.join(&name)).await?;
            doc.apply_update(&bytes).map_err(|source| StorageError::Corrupt {
                reference: name.clone(),
                source,
            })?;
            references.push(SnapshotRef(name));
        }
        Ok(Some(RetrievedDoc { doc, references }))
    }

    async fn delete_references(
        &self,
        room: &str,
        docid: &str,
        refs: &[SnapshotRef],
    ) -> Result<(), StorageError> {
        let dir = self.doc_dir(room, docid);
        for reference in refs {
            if let Err(e) = tokio::fs::remove_file(dir.join(&reference.0)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    // Retried by the next compaction over this room.
                    tracing::warn!(
                        room = %room,
                        docid = %docid,
                        reference = %reference,
                        error = %e,
                        "failed to delete snapshot reference"
                    );
                }
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
