//! # collab-core
//!
//! Shared primitives for the realtime collaboration backend:
//!
//! - **Protocol**: the varint-tagged binary frame codec spoken on every
//!   WebSocket connection
//! - **Room**: logical document identity (`room` + `docid`)
//! - **CRDT**: merge/diff/state-vector operations over opaque update bytes

pub mod crdt;
pub mod protocol;
pub mod room;

pub use crdt::{CrdtError, DocState};
pub use protocol::{Frame, ProtocolError};
pub use room::{RoomId, DEFAULT_DOC_ID};
