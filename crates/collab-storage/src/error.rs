//! Storage error type

use collab_core::crdt::CrdtError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot {reference} is undecodable: {source}")]
    Corrupt {
        reference: String,
        #[source]
        source: CrdtError,
    },

    #[error("unknown storage driver: {0}")]
    UnknownDriver(String),
}

impl StorageError {
    /// Whether this error should quarantine the room rather than be retried.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
