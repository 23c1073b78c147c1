//! Wire protocol
//!
//! Every WebSocket message is a sequence of binary frames. A frame is a
//! varint kind tag followed by a varint-length-prefixed payload:
//!
//! ```text
//! [tag: varint] [len: varint] [payload: len bytes]
//! ```
//!
//! | Tag | Kind | Payload |
//! |-----|------|---------|
//! | 0 | sync-step-1 | remote state vector |
//! | 1 | sync-step-2 / update | CRDT update bytes |
//! | 2 | awareness | awareness update bytes |
//! | 3 | auth-request | token challenge (server -> client) |
//! | 4 | auth-reply | token (client -> server) |
//!
//! Server-originated messages may pack multiple frames back to back;
//! [`Frame::decode_all`] consumes a whole message. Any parse failure is a
//! protocol violation and closes the session.

mod varint;

pub use varint::{read_var_u64, write_var_u64, VarintError};

use bytes::{Bytes, BytesMut};

/// Upper bound on a single frame payload. Larger frames are protocol
/// violations, applied before any allocation.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

const TAG_SYNC_STEP1: u64 = 0;
const TAG_UPDATE: u64 = 1;
const TAG_AWARENESS: u64 = 2;
const TAG_AUTH_REQUEST: u64 = 3;
const TAG_AUTH_REPLY: u64 = 4;

/// Protocol decode errors. All of them close the session with 1003.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown frame tag {0}")]
    UnknownTag(u64),

    #[error("frame truncated")]
    Truncated,

    #[error("varint malformed or out of range")]
    Varint,

    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    Oversize { len: usize, max: usize },

    #[error("empty message")]
    Empty,
}

/// One protocol frame. Payloads are opaque byte sequences owned by the CRDT
/// or auth layers; the codec never inspects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Remote state vector; the receiver answers with an [`Frame::Update`]
    /// diff computed against it.
    SyncStep1(Bytes),
    /// A CRDT update (also used as the sync-step-2 reply).
    Update(Bytes),
    /// Awareness payload. Broadcast, never persisted.
    Awareness(Bytes),
    /// Server asks the client to authenticate.
    AuthRequest(Bytes),
    /// Client presents its token.
    AuthReply(Bytes),
}

impl Frame {
    /// The varint kind tag of this frame.
    #[must_use]
    pub fn tag(&self) -> u64 {
        match self {
            Self::SyncStep1(_) => TAG_SYNC_STEP1,
            Self::Update(_) => TAG_UPDATE,
            Self::Awareness(_) => TAG_AWARENESS,
            Self::AuthRequest(_) => TAG_AUTH_REQUEST,
            Self::AuthReply(_) => TAG_AUTH_REPLY,
        }
    }

    /// The opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        match self {
            Self::SyncStep1(p)
            | Self::Update(p)
            | Self::Awareness(p)
            | Self::AuthRequest(p)
            | Self::AuthReply(p) => p,
        }
    }

    /// Append the encoded frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let payload = self.payload();
        write_var_u64(dst, self.tag());
        write_var_u64(dst, payload.len() as u64);
        dst.extend_from_slice(payload);
    }

    /// Encode this frame as a standalone message.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload().len() + 12);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode several frames into one composite message.
    #[must_use]
    pub fn encode_all(frames: &[Frame]) -> Bytes {
        let mut buf = BytesMut::new();
        for frame in frames {
            frame.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Decode a single frame from the front of `input`, advancing it.
    pub fn decode(input: &mut &[u8]) -> Result<Self, ProtocolError> {
        let tag = read_var_u64(input).map_err(|_| ProtocolError::Varint)?;
        let len = read_var_u64(input).map_err(|_| ProtocolError::Varint)? as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::Oversize {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        if input.len() < len {
            return Err(ProtocolError::Truncated);
        }
        let payload = Bytes::copy_from_slice(&input[..len]);
        *input = &input[len..];

        match tag {
            TAG_SYNC_STEP1 => Ok(Self::SyncStep1(payload)),
            TAG_UPDATE => Ok(Self::Update(payload)),
            TAG_AWARENESS => Ok(Self::Awareness(payload)),
            TAG_AUTH_REQUEST => Ok(Self::AuthRequest(payload)),
            TAG_AUTH_REPLY => Ok(Self::AuthReply(payload)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Decode a whole message into its frames. Rejects empty messages and
    /// trailing garbage.
    pub fn decode_all(mut input: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        if input.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut frames = Vec::new();
        while !input.is_empty() {
            frames.push(Self::decode(&mut input)?);
        }
        Ok(frames)
    }
}
