//! The per-gateway subscription table.
//!
//! Maps each room with local clients to its fan-out cursor. Invariants:
//! a room is present iff it has at least one client, and `last_id` only
//! moves forward, so no entry is ever delivered twice to the same session.

use collab_core::room::RoomId;
use collab_streams::EntryId;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug)]
struct RoomSlot {
    last_id: EntryId,
    clients: HashSet<String>,
}

/// `room -> { last_id, clients }`, owned exclusively by this gateway's
/// subscription multiplexer.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    rooms: DashMap<RoomId, RoomSlot>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to a room. Returns true when this created the room
    /// (cursor starts at the beginning of the current stream).
    pub fn add_client(&self, room: RoomId, session_id: String) -> bool {
        let mut created = false;
        self.rooms
            .entry(room)
            .or_insert_with(|| {
                created = true;
                RoomSlot {
                    last_id: EntryId::ZERO,
                    clients: HashSet::new(),
                }
            })
            .clients
            .insert(session_id);
        created
    }

    /// Remove a client from a room. Returns true when the room emptied and
    /// was dropped from the table.
    pub fn remove_client(&self, room: &RoomId, session_id: &str) -> bool {
        let emptied = match self.rooms.get_mut(room) {
            Some(mut slot) => {
                slot.clients.remove(session_id);
                slot.clients.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms
                .remove_if(room, |_, slot| slot.clients.is_empty());
        }
        emptied
    }

    /// Snapshot of `(room, last_id)` for the next XREAD cycle.
    #[must_use]
    pub fn cursors(&self) -> Vec<(RoomId, EntryId)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_id))
            .collect()
    }

    /// Advance a room's cursor to `id`. Returns false when the room is gone
    /// or `id` was already delivered; the caller must not forward it.
    pub fn advance(&self, room: &RoomId, id: EntryId) -> bool {
        match self.rooms.get_mut(room) {
            Some(mut slot) if id > slot.last_id => {
                slot.last_id = id;
                true
            }
            _ => false,
        }
    }

    /// The sessions currently subscribed to a room.
    #[must_use]
    pub fn clients_of(&self, room: &RoomId) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|slot| slot.clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of subscribed rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
