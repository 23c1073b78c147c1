//! Room identity
//!
//! A room is the logical unit of collaboration. Every room carries a `docid`
//! for future multi-document rooms; today it is almost always
//! [`DEFAULT_DOC_ID`].

use serde::{Deserialize, Serialize};

/// The document id used when a room holds a single document.
pub const DEFAULT_DOC_ID: &str = "index";

/// Logical document identity: `(room, docid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId {
    room: String,
    docid: String,
}

impl RoomId {
    /// Create a room identity with an explicit document id.
    pub fn new(room: impl Into<String>, docid: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            docid: docid.into(),
        }
    }

    /// Create a room identity for the default document.
    pub fn index(room: impl Into<String>) -> Self {
        Self::new(room, DEFAULT_DOC_ID)
    }

    /// The room name.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// The document id within the room.
    pub fn docid(&self) -> &str {
        &self.docid
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.room, self.docid)
    }
}

/// Percent-encode a room or docid component for use in storage paths and
/// Redis key names. Everything outside RFC 3986 unreserved characters is
/// escaped, so encoded components never contain `:` or `/`.
#[must_use]
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from_digit(u32::from(b >> 4), 16).unwrap_or('0').to_ascii_uppercase());
                out.push(char::from_digit(u32::from(b & 0xf), 16).unwrap_or('0').to_ascii_uppercase());
            }
        }
    }
    out
}

/// Inverse of [`encode_component`]. Malformed escapes are passed through
/// verbatim rather than rejected; key parsing treats them as opaque.
#[must_use]
pub fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_room_uses_default_docid() {
        let id = RoomId::index("notes");
        assert_eq!(id.room(), "notes");
        assert_eq!(id.docid(), DEFAULT_DOC_ID);
        assert_eq!(id.to_string(), "notes/index");
    }

    #[test]
    fn encode_escapes_separators() {
        assert_eq!(encode_component("plain-room_1.x~"), "plain-room_1.x~");
        assert_eq!(encode_component("a:b/c"), "a%3Ab%2Fc");
        assert_eq!(encode_component("room name"), "room%20name");
    }

    #[test]
    fn encode_decode_round_trip() {
        for s in ["simple", "with:colon", "with/slash", "ünïcode", "a b%c"] {
            assert_eq!(decode_component(&encode_component(s)), s);
        }
    }

    #[test]
    fn decode_passes_through_malformed_escapes() {
        assert_eq!(decode_component("abc%"), "abc%");
        assert_eq!(decode_component("%zz"), "%zz");
    }
}
