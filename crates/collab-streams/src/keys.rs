//! Redis key naming.
//!
//! Everything the system touches in Redis lives under one prefix:
//!
//! - room streams: `{prefix}:room:{enc(room)}:{enc(docid)}`
//! - worker queue: `{prefix}:worker`
//!
//! Room and docid components are percent-encoded, so the encoded parts never
//! contain `:` and the key parses back unambiguously.

use collab_core::room::{decode_component, encode_component, RoomId};

/// Key builder/parser bound to a configured prefix.
#[derive(Debug, Clone)]
pub struct KeyScheme {
    prefix: String,
}

impl KeyScheme {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The stream key for a room.
    #[must_use]
    pub fn room_stream(&self, room: &RoomId) -> String {
        format!(
            "{}:room:{}:{}",
            self.prefix,
            encode_component(room.room()),
            encode_component(room.docid())
        )
    }

    /// The worker task queue key.
    #[must_use]
    pub fn worker_queue(&self) -> String {
        format!("{}:worker", self.prefix)
    }

    /// Parse a room stream key back into its identity. Worker tasks carry
    /// the stream key as payload, so the worker needs the inverse mapping.
    #[must_use]
    pub fn parse_room_stream(&self, key: &str) -> Option<RoomId> {
        let rest = key.strip_prefix(&self.prefix)?.strip_prefix(":room:")?;
        let (room, docid) = rest.split_once(':')?;
        if room.is_empty() || docid.is_empty() || docid.contains(':') {
            return None;
        }
        Some(RoomId::new(decode_component(room), decode_component(docid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_stream_key_layout() {
        let keys = KeyScheme::new("y");
        let id = RoomId::index("doc-1");
        assert_eq!(keys.room_stream(&id), "y:room:doc-1:index");
        assert_eq!(keys.worker_queue(), "y:worker");
    }

    #[test]
    fn separators_in_room_names_are_escaped() {
        let keys = KeyScheme::new("y");
        let id = RoomId::new("a:b", "index");
        let key = keys.room_stream(&id);
        assert_eq!(key, "y:room:a%3Ab:index");
        assert_eq!(keys.parse_room_stream(&key), Some(id));
    }

    #[test]
    fn parse_round_trips() {
        let keys = KeyScheme::new("prod");
        for (room, docid) in [("r1", "index"), ("has space", "index"), ("a/b", "d:1")] {
            let id = RoomId::new(room, docid);
            let key = keys.room_stream(&id);
            assert_eq!(keys.parse_room_stream(&key), Some(id));
        }
    }

    #[test]
    fn foreign_keys_do_not_parse() {
        let keys = KeyScheme::new("y");
        assert_eq!(keys.parse_room_stream("y:worker"), None);
        assert_eq!(keys.parse_room_stream("other:room:a:b"), None);
        assert_eq!(keys.parse_room_stream("y:room:only-room"), None);
    }
}
