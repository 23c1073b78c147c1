//! Document fixtures for tests.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, ReadTxn, StateVector, Transact, Update};

/// A client-side document: authors incremental updates and absorbs remote
/// ones, the way a real editor peer would.
pub struct DocHandle {
    doc: Doc,
}

impl DocHandle {
    #[must_use]
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Set a map key and return the incremental update for just this edit.
    pub fn set(&self, key: &str, value: &str) -> Vec<u8> {
        let map = self.doc.get_or_insert_map("data");
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            map.insert(&mut txn, key, value);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Apply a remote update. Returns false when the bytes do not decode.
    pub fn apply(&self, update: &[u8]) -> bool {
        let Ok(decoded) = Update::decode_v1(update) else {
            return false;
        };
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded).is_ok()
    }

    #[must_use]
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Full state as one update.
    #[must_use]
    pub fn encode_full(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for DocHandle {
    fn default() -> Self {
        Self::new()
    }
}
