//! # collab-streams
//!
//! Thin layer over Redis streams: the per-room append-only logs that carry
//! updates between gateways, and the global worker queue that schedules
//! compactions. Redis is the only cross-process shared state in the system;
//! everything here is a single atomic command (or one server-side script).

mod id;
mod keys;
mod pool;
mod room_stream;
mod worker_queue;

pub use id::{EntryId, ParseEntryIdError};
pub use keys::KeyScheme;
pub use pool::{RedisPool, RedisPoolError, RedisResult};
pub use room_stream::{RoomEntry, RoomStreamClient, StreamBatch};
pub use worker_queue::{WorkerQueue, WorkerTask};
