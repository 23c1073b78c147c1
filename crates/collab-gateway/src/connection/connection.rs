//! Individual WebSocket connection
//!
//! Represents one authenticated session in one room. Outbound traffic goes
//! through a bounded channel; the fan-out loop never blocks on a slow
//! socket, it drops frames for that session and eventually drops the
//! session itself.

use super::CloseCode;
use axum::extract::ws::Message;
use bytes::Bytes;
use collab_common::{Authenticated, Permission};
use collab_core::room::RoomId;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// Outbound channel depth per session.
pub const OUTBOUND_BUFFER: usize = 256;

/// How long a session may sit with a full outbound buffer before it is
/// closed as a slow consumer.
pub const SEND_GRACE: Duration = Duration::from_secs(5);

/// Out-of-band close signal. Lives separately from [`Connection`] so the
/// socket task can wait on it without keeping the outbound channel alive.
#[derive(Debug, Default)]
pub struct Closer {
    code: AtomicU16,
    notify: Notify,
}

impl Closer {
    /// Request the socket be closed with `code`. First caller wins.
    pub fn close(&self, code: CloseCode) {
        let _ = self
            .code
            .compare_exchange(0, code.as_u16(), Ordering::SeqCst, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wait until a close is requested, returning its code.
    pub async fn closed(&self) -> u16 {
        self.notify.notified().await;
        match self.code.load(Ordering::SeqCst) {
            0 => CloseCode::Normal.as_u16(),
            code => code,
        }
    }
}

/// A single WebSocket session.
pub struct Connection {
    session_id: String,
    user_id: String,
    permission: Permission,
    room: RoomId,
    sender: mpsc::Sender<Message>,
    closer: Arc<Closer>,
    congested_since: Mutex<Option<Instant>>,
    last_pong: Mutex<Instant>,
    created_at: Instant,
}

impl Connection {
    pub fn new(
        session_id: String,
        room: RoomId,
        authed: Authenticated,
        sender: mpsc::Sender<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            user_id: authed.user_id,
            permission: authed.permission,
            room,
            sender,
            closer: Arc::new(Closer::default()),
            congested_since: Mutex::new(None),
            last_pong: Mutex::new(Instant::now()),
            created_at: Instant::now(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn closer(&self) -> Arc<Closer> {
        self.closer.clone()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Queue a binary frame for this session without blocking.
    ///
    /// A full buffer drops the frame (the client re-syncs on reconnect);
    /// a buffer that stays full past [`SEND_GRACE`] closes the session with
    /// 1008. Returns false once the session is being dropped.
    pub fn send_bytes(&self, bytes: Bytes) -> bool {
        match self.sender.try_send(Message::Binary(bytes)) {
            Ok(()) => {
                *self.congested_since.lock().unwrap_or_else(|e| e.into_inner()) = None;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut congested = self
                    .congested_since
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let since = congested.get_or_insert_with(Instant::now);
                if since.elapsed() >= SEND_GRACE {
                    tracing::warn!(
                        session_id = %self.session_id,
                        room = %self.room,
                        "closing slow consumer"
                    );
                    self.close(CloseCode::PolicyViolation);
                    false
                } else {
                    tracing::trace!(
                        session_id = %self.session_id,
                        "outbound buffer full, frame dropped"
                    );
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a WebSocket ping. Returns false when the channel is gone.
    pub fn send_ping(&self) -> bool {
        !matches!(
            self.sender.try_send(Message::Ping(Vec::new().into())),
            Err(mpsc::error::TrySendError::Closed(_))
        )
    }

    pub fn record_pong(&self) {
        *self.last_pong.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Whether the client has failed to answer pings for `timeout`.
    pub fn is_unresponsive(&self, timeout: Duration) -> bool {
        self.last_pong
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
            > timeout
    }

    /// Ask the socket task to close this session with `code`.
    pub fn close(&self, code: CloseCode) {
        self.closer.close(code);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("room", &self.room)
            .field("age", &self.age())
            .finish()
    }
}
