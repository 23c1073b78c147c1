//! CRDT operations over opaque update bytes.
//!
//! The rest of the system treats updates as blobs with three laws: merging
//! is associative, commutative and idempotent. This module is the only place
//! that knows the blobs are Yjs updates (via `yrs`); everything else goes
//! through [`DocState`].

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Errors from decoding or applying update bytes.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("undecodable update: {0}")]
    Decode(String),

    #[error("update could not be applied: {0}")]
    Apply(String),

    #[error("undecodable state vector: {0}")]
    StateVector(String),
}

/// A materialized document: the merge of every update applied to it.
pub struct DocState {
    doc: Doc,
}

impl DocState {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Strictly apply one update. Used where a bad update must surface, e.g.
    /// when decoding a snapshot blob.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), CrdtError> {
        let update = Update::decode_v1(update).map_err(|e| CrdtError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CrdtError::Apply(e.to_string()))
    }

    /// Merge a batch of updates, skipping undecodable ones with a warning.
    /// Stream payloads were validated on publish, so a skip here means the
    /// entry was corrupted in transit and the remaining history still merges.
    pub fn merge<I, U>(updates: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: AsRef<[u8]>,
    {
        let mut state = Self::new();
        state.merge_into(updates);
        state
    }

    /// Merge further updates into this document, skipping undecodable ones.
    pub fn merge_into<I, U>(&mut self, updates: I)
    where
        I: IntoIterator<Item = U>,
        U: AsRef<[u8]>,
    {
        for update in updates {
            if let Err(e) = self.apply_update(update.as_ref()) {
                tracing::warn!(error = %e, "skipping unmergeable update");
            }
        }
    }

    /// Encode the full document as a single update (the merge of its
    /// history). Applying this to an empty document reproduces the state.
    #[must_use]
    pub fn encode_update(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the updates a replica with `state_vector` is missing.
    pub fn diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, CrdtError> {
        let sv = if state_vector.is_empty() {
            StateVector::default()
        } else {
            StateVector::decode_v1(state_vector)
                .map_err(|e| CrdtError::StateVector(e.to_string()))?
        };
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    /// The document's state vector: a compact summary of what it has seen.
    #[must_use]
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Whether the document has seen any update at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.transact().state_vector() == StateVector::default()
    }

    /// Validate that `bytes` decode as an update without applying them.
    pub fn validate_update(bytes: &[u8]) -> Result<(), CrdtError> {
        Update::decode_v1(bytes)
            .map(|_| ())
            .map_err(|e| CrdtError::Decode(e.to_string()))
    }
}

impl Default for DocState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocState").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::Map;

    fn update_with_entry(key: &str, value: &str) -> (Doc, Vec<u8>) {
        let doc = Doc::new();
        let map = doc.get_or_insert_map("data");
        {
            let mut txn = doc.transact_mut();
            map.insert(&mut txn, key, value);
        }
        let update = doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default());
        (doc, update)
    }

    #[test]
    fn empty_doc_has_default_state_vector() {
        let state = DocState::new();
        assert!(state.is_empty());
        assert_eq!(state.state_vector(), StateVector::default().encode_v1());
    }

    #[test]
    fn merge_reproduces_source_state() {
        let (source, update) = update_with_entry("a", "1");
        let merged = DocState::merge([&update]);
        assert!(!merged.is_empty());
        assert_eq!(
            merged.state_vector(),
            source.transact().state_vector().encode_v1()
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let (_, update) = update_with_entry("a", "1");
        let once = DocState::merge([&update]);
        let twice = DocState::merge([&update, &update]);
        assert_eq!(once.encode_update(), twice.encode_update());
    }

    #[test]
    fn merge_skips_garbage_and_keeps_good_updates() {
        let (_, update) = update_with_entry("a", "1");
        let garbage = vec![0xde, 0xad, 0xbe, 0xef];
        let merged = DocState::merge([update.as_slice(), garbage.as_slice()]);
        assert!(!merged.is_empty());
    }

    #[test]
    fn strict_apply_rejects_garbage() {
        let mut state = DocState::new();
        assert!(state.apply_update(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn diff_against_own_state_vector_is_noop() {
        let (_, update) = update_with_entry("a", "1");
        let state = DocState::merge([&update]);
        let diff = state.diff(&state.state_vector()).unwrap();
        let mut replica = DocState::merge([&update]);
        let before = replica.state_vector();
        replica.merge_into([&diff]);
        assert_eq!(replica.state_vector(), before);
    }

    #[test]
    fn diff_from_empty_carries_everything() {
        let (source, update) = update_with_entry("a", "1");
        let state = DocState::merge([&update]);
        let diff = state.diff(&[]).unwrap();
        let replica = DocState::merge([&diff]);
        assert_eq!(
            replica.state_vector(),
            source.transact().state_vector().encode_v1()
        );
    }

    #[test]
    fn validate_accepts_real_updates() {
        let (_, update) = update_with_entry("k", "v");
        assert!(DocState::validate_update(&update).is_ok());
        assert!(DocState::validate_update(&[0x01]).is_err());
    }
}
