//! Origin correlation for locally published entries.
//!
//! When a session publishes an update, its room peers already received it
//! through the local broadcast. The publish's stream ID is recorded here so
//! the fan-out loop can recognize the entry coming back from Redis and skip
//! local redelivery. The correlation is carried only in-process, never on
//! the wire; a missed correlation (the read raced the registration) falls
//! back to delivering to everyone, which the CRDT absorbs.

use collab_core::room::RoomId;
use collab_streams::EntryId;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Entries kept per room before the oldest are evicted. Far beyond anything
/// a single XREAD cycle can lag.
const PER_ROOM_CAP: usize = 1024;

/// `(room, stream id) -> originating session`.
#[derive(Debug, Default)]
pub struct EchoRegistry {
    rooms: DashMap<RoomId, BTreeMap<EntryId, String>>,
    /// Publishes in flight per room. The fan-out loop uses this to tell
    /// "that entry was never ours" apart from "its registration has not
    /// landed yet".
    pending: DashMap<RoomId, usize>,
}

impl EchoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a local publish as in flight. Must happen before the XADD so
    /// the counter is visible by the time the entry can be read back.
    pub fn begin_publish(&self, room: &RoomId) {
        *self.pending.entry(room.clone()).or_insert(0) += 1;
    }

    /// The publish finished (registered or failed).
    pub fn end_publish(&self, room: &RoomId) {
        if let Some(mut count) = self.pending.get_mut(room) {
            *count = count.saturating_sub(1);
        }
        self.pending.remove_if(room, |_, count| *count == 0);
    }

    /// Whether any local publish for this room is still in flight.
    #[must_use]
    pub fn has_pending(&self, room: &RoomId) -> bool {
        self.pending.get(room).map(|c| *c > 0).unwrap_or(false)
    }

    /// Record that `session_id` published the entry `id` in `room`.
    pub fn register(&self, room: &RoomId, id: EntryId, session_id: &str) {
        let mut entries = self.rooms.entry(room.clone()).or_default();
        entries.insert(id, session_id.to_string());
        while entries.len() > PER_ROOM_CAP {
            entries.pop_first();
        }
    }

    /// Take the origin of entry `id`, if it was published locally. Entries
    /// at or below `id` are pruned: the fan-out loop consumes IDs in order,
    /// so anything older can never be asked for again.
    pub fn take(&self, room: &RoomId, id: EntryId) -> Option<String> {
        let mut entries = self.rooms.get_mut(room)?;
        let origin = entries.remove(&id);
        let newer = entries.split_off(&id);
        *entries = newer;
        if entries.is_empty() {
            drop(entries);
            self.rooms.remove_if(room, |_, map| map.is_empty());
        }
        origin
    }
}
