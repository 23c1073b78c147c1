//! Dirty-room enqueue deduplication.
//!
//! A room key is pushed onto the worker queue on the first publish to a
//! previously-clean room. "Previously clean" is approximated by an in-memory
//! entry with TTL equal to the stream drain interval: while the entry lives,
//! the worker is already scheduled and re-enqueueing would only produce
//! no-op tasks.

use collab_core::room::RoomId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// TTL map of rooms whose worker task is assumed in flight.
#[derive(Debug)]
pub struct QueuedCache {
    entries: DashMap<RoomId, Instant>,
    ttl: Duration,
}

impl QueuedCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns true when the caller should enqueue a worker task for this
    /// room, marking it queued as of `now`. At most one caller per TTL
    /// window gets a true.
    pub fn should_enqueue(&self, room: &RoomId, now: Instant) -> bool {
        // Occasional sweep so idle rooms do not accumulate forever.
        if self.entries.len() > 1024 {
            self.entries
                .retain(|_, queued_at| now.duration_since(*queued_at) < self.ttl);
        }

        let mut fresh = false;
        let mut entry = self.entries.entry(room.clone()).or_insert_with(|| {
            fresh = true;
            now
        });
        if fresh {
            return true;
        }
        if now.duration_since(*entry.value()) >= self.ttl {
            *entry.value_mut() = now;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publish_enqueues() {
        let cache = QueuedCache::new(Duration::from_secs(60));
        let room = RoomId::index("r1");
        let now = Instant::now();
        assert!(cache.should_enqueue(&room, now));
        assert!(!cache.should_enqueue(&room, now));
    }

    #[test]
    fn expired_entry_enqueues_again() {
        let cache = QueuedCache::new(Duration::from_millis(10));
        let room = RoomId::index("r1");
        let start = Instant::now();
        assert!(cache.should_enqueue(&room, start));
        assert!(!cache.should_enqueue(&room, start));
        let later = start + Duration::from_millis(11);
        assert!(cache.should_enqueue(&room, later));
        assert!(!cache.should_enqueue(&room, later));
    }

    #[test]
    fn rooms_are_independent() {
        let cache = QueuedCache::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(cache.should_enqueue(&RoomId::index("a"), now));
        assert!(cache.should_enqueue(&RoomId::index("b"), now));
    }
}
