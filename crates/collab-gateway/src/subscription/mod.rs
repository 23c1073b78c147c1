//! Subscription multiplexer
//!
//! One loop per gateway reads every subscribed room through a single
//! blocking XREAD and fans entries out to local clients in stream order.
//! Rooms enter the table on the first subscribe and leave it when their
//! last client goes; the next read cycle picks the change up.

mod echo;
mod table;

pub use echo::EchoRegistry;
pub use table::SubscriptionTable;

use crate::connection::{Connection, ConnectionManager};
use bytes::Bytes;
use collab_api::{ApiError, DocApi};
use collab_common::metrics::SharedMetrics;
use collab_core::protocol::Frame;
use collab_core::room::RoomId;
use collab_streams::{EntryId, RoomEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Delay before retrying after a failed read cycle.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Per-room fan-out driven by the shared room streams.
pub struct RoomSubscriber {
    table: SubscriptionTable,
    echo: EchoRegistry,
    manager: Arc<ConnectionManager>,
    api: Arc<DocApi>,
    /// Wakes the read loop when the table goes from empty to non-empty.
    wakeup: Notify,
    running: AtomicBool,
    metrics: SharedMetrics,
}

impl RoomSubscriber {
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        api: Arc<DocApi>,
        metrics: SharedMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            table: SubscriptionTable::new(),
            echo: EchoRegistry::new(),
            manager,
            api,
            wakeup: Notify::new(),
            running: AtomicBool::new(false),
            metrics,
        })
    }

    /// Spawn the background read loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("subscription loop is already running");
            return;
        }
        let subscriber = self.clone();
        tokio::spawn(async move {
            subscriber.run().await;
        });
        tracing::info!("subscription loop started");
    }

    /// Stop the background read loop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            let cursors = self.table.cursors();
            if cursors.is_empty() {
                // Nothing subscribed; sleep until the first subscribe.
                let _ = tokio::time::timeout(RECONNECT_DELAY, self.wakeup.notified()).await;
                continue;
            }

            let mut room_by_key = HashMap::with_capacity(cursors.len());
            let mut keyed = Vec::with_capacity(cursors.len());
            for (room, last_id) in cursors {
                let key = self.api.streams().keys().room_stream(&room);
                keyed.push((key.clone(), last_id));
                room_by_key.insert(key, room);
            }

            match self.api.streams().read_rooms(&keyed).await {
                Ok(batches) => {
                    for batch in batches {
                        let Some(room) = room_by_key.get(&batch.key) else {
                            continue;
                        };
                        for entry in batch.entries {
                            self.deliver(room, entry).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "room stream read failed, backing off");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        tracing::info!("subscription loop ended");
    }

    /// Forward one stream entry to the room's local clients, in ID order.
    async fn deliver(&self, room: &RoomId, entry: RoomEntry) {
        if !self.table.advance(room, entry.id) {
            // Already delivered (duplicate at a resubscription boundary) or
            // the room lost its last client mid-cycle.
            return;
        }

        // A publish on this gateway registers its origin right after the
        // XADD resolves; the XREAD can beat that by a scheduler turn. While
        // a local publish is in flight, give the registration a moment
        // before treating the entry as remote.
        let mut spins = 0u32;
        loop {
            if let Some(origin) = self.echo.take(room, entry.id) {
                tracing::trace!(
                    room = %room,
                    id = %entry.id,
                    origin = %origin,
                    "entry originated here, local broadcast already covered it"
                );
                return;
            }
            if !self.echo.has_pending(room) || spins >= 50 {
                break;
            }
            spins += 1;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        self.metrics.incr_counter("fanout.entries", 1);
        let frame = Frame::Update(entry.payload.into()).encode();
        self.send_to_room(room, frame, None);
    }

    /// Send raw bytes to every client in the room, except `exclude`.
    pub fn send_to_room(&self, room: &RoomId, bytes: Bytes, exclude: Option<&str>) -> usize {
        let mut sent = 0;
        for session_id in self.table.clients_of(room) {
            if Some(session_id.as_str()) == exclude {
                continue;
            }
            if let Some(conn) = self.manager.get(&session_id) {
                if conn.send_bytes(bytes.clone()) {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Subscribe a connection to its room and send the initial catch-up:
    /// the merged document as sync-step-2, followed by the server's state
    /// vector as sync-step-1 so the client can answer with what we lack.
    pub async fn subscribe(&self, conn: &Arc<Connection>) -> Result<(), ApiError> {
        let room = conn.room();
        let created = self
            .table
            .add_client(room.clone(), conn.session_id().to_string());
        if created {
            tracing::debug!(room = %room, "room added to subscription table");
        }
        self.wakeup.notify_one();
        self.metrics
            .record_gauge("rooms.subscribed", self.table.room_count() as f64);

        let view = self.api.get_doc(room).await?;
        if created {
            if let Some(last_id) = view.last_id {
                // The catch-up already carries everything up to last_id, so
                // the fresh cursor may skip those entries. With an existing
                // cursor the loop must still deliver them to earlier
                // subscribers; the newcomer absorbs the duplicates.
                self.table.advance(room, last_id);
            }
        }
        let catch_up = Frame::encode_all(&[
            Frame::Update(view.doc.encode_update().into()),
            Frame::SyncStep1(view.doc.state_vector().into()),
        ]);
        conn.send_bytes(catch_up);

        tracing::info!(
            session_id = %conn.session_id(),
            user_id = %conn.user_id(),
            room = %room,
            "session subscribed"
        );
        Ok(())
    }

    /// Remove a connection from its room; empty rooms leave the table.
    pub fn unsubscribe(&self, conn: &Arc<Connection>) {
        if self.table.remove_client(conn.room(), conn.session_id()) {
            tracing::debug!(room = %conn.room(), "room dropped from subscription table");
        }
        self.metrics
            .record_gauge("rooms.subscribed", self.table.room_count() as f64);
    }

    /// Record the origin of a locally published entry.
    pub fn register_echo(&self, room: &RoomId, id: EntryId, session_id: &str) {
        self.echo.register(room, id, session_id);
    }

    /// Mark a local publish as starting; pair with [`Self::end_publish`].
    pub fn begin_publish(&self, room: &RoomId) {
        self.echo.begin_publish(room);
    }

    /// The publish finished, successfully or not.
    pub fn end_publish(&self, room: &RoomId) {
        self.echo.end_publish(room);
    }

    /// Number of rooms with local subscribers.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.table.room_count()
    }
}

impl std::fmt::Debug for RoomSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSubscriber")
            .field("rooms", &self.table.room_count())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}
