//! # collab-api
//!
//! The document API used by both the gateway and the worker: the
//! authoritative state of a room is its latest snapshots in storage merged
//! with its stream tail in Redis, and this crate is the only place that
//! composition lives.

mod client;
mod queued;

pub use client::{ApiError, DocApi, DocView};
pub use queued::QueuedCache;
