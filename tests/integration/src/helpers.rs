//! Test helpers
//!
//! `TestHarness` runs gateways and a worker in-process, sharing one memory
//! storage instance so compaction is observable from the test. Every harness
//! gets a unique Redis key prefix, so parallel tests never collide.

use crate::fixtures::DocHandle;
use anyhow::{Context, Result};
use collab_common::AppConfig;
use collab_core::protocol::Frame;
use collab_core::room::RoomId;
use collab_gateway::{create_app, create_gateway_state_with_storage};
use collab_storage::MemoryStorage;
use collab_streams::KeyScheme;
use collab_worker::create_compactor_with_storage;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// Redis URL for tests, `REDIS_URL` or the local default.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Whether a live Redis is reachable. Tests return early when not.
pub async fn check_test_env() -> bool {
    let url = redis_url();
    let Ok(client) = redis::Client::open(url.as_str()) else {
        return false;
    };
    let connect = client.get_multiplexed_async_connection();
    match tokio::time::timeout(Duration::from_secs(2), connect).await {
        Ok(Ok(mut conn)) => redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok(),
        _ => {
            eprintln!("skipping: Redis not reachable at {url}");
            false
        }
    }
}

/// One test's worth of infrastructure: a primary gateway, optionally more,
/// optionally a worker, all sharing storage and a unique key prefix.
pub struct TestHarness {
    pub config: AppConfig,
    pub storage: MemoryStorage,
    pub keys: KeyScheme,
    pub gateway_addr: SocketAddr,
    _worker_shutdown: Option<tokio::sync::watch::Sender<bool>>,
}

impl TestHarness {
    /// Start a harness with one gateway.
    pub async fn start() -> Result<Self> {
        let prefix = format!("t{}", Uuid::new_v4().simple());
        let config = AppConfig::for_tests(redis_url(), prefix.clone());
        let storage = MemoryStorage::new();
        let keys = KeyScheme::new(prefix);

        let mut harness = Self {
            config,
            storage,
            keys,
            gateway_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            _worker_shutdown: None,
        };
        harness.gateway_addr = harness.spawn_gateway().await?;
        Ok(harness)
    }

    /// Spawn an additional gateway sharing this harness's storage and
    /// prefix. Returns its address.
    pub async fn spawn_gateway(&self) -> Result<SocketAddr> {
        let state = create_gateway_state_with_storage(
            self.config.clone(),
            Arc::new(self.storage.clone()),
        )
        .await
        .map_err(|e| anyhow::anyhow!("gateway state: {e}"))?;
        let app = create_app(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        // Give the listener a moment to accept.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(addr)
    }

    /// Start one worker against this harness's storage.
    pub async fn start_worker(&mut self) -> Result<()> {
        let compactor =
            create_compactor_with_storage(&self.config, Arc::new(self.storage.clone()))
                .map_err(|e| anyhow::anyhow!("compactor: {e}"))?;
        compactor
            .queue()
            .ensure_group()
            .await
            .context("ensure consumer group")?;

        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            compactor.run_until(rx).await;
        });
        self._worker_shutdown = Some(tx);
        Ok(())
    }

    /// WebSocket URL for a room on the primary gateway.
    pub fn ws_url(&self, room: &str) -> String {
        Self::ws_url_at(self.gateway_addr, room)
    }

    /// WebSocket URL for a room on any gateway.
    pub fn ws_url_at(addr: SocketAddr, room: &str) -> String {
        format!("ws://{addr}/{room}?token=test-user")
    }

    async fn redis_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(redis_url().as_str())?;
        Ok(client.get_multiplexed_async_connection().await?)
    }

    /// Whether a room's stream key currently exists.
    pub async fn stream_exists(&self, room: &str) -> Result<bool> {
        let key = self.keys.room_stream(&RoomId::index(room));
        let mut conn = self.redis_conn().await?;
        Ok(redis::cmd("EXISTS")
            .arg(&key)
            .query_async::<i64>(&mut conn)
            .await?
            == 1)
    }

    /// Length of the worker task queue stream.
    pub async fn worker_queue_len(&self) -> Result<usize> {
        let mut conn = self.redis_conn().await?;
        Ok(redis::cmd("XLEN")
            .arg(self.keys.worker_queue())
            .query_async::<usize>(&mut conn)
            .await?)
    }

    /// Live snapshot reference count for a room.
    pub fn reference_count(&self, room: &str) -> usize {
        self.storage.reference_count(room, "index")
    }
}

/// A raw WebSocket peer: sends updates, absorbs whatever the gateway fans
/// out, and tracks what it saw.
pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub doc: DocHandle,
    updates_applied: usize,
    awareness_seen: Vec<Vec<u8>>,
}

impl TestClient {
    /// Connect and wait for nothing; the initial catch-up arrives through
    /// the normal receive path.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await.context("websocket connect")?;
        Ok(Self {
            socket,
            doc: DocHandle::new(),
            updates_applied: 0,
            awareness_seen: Vec::new(),
        })
    }

    /// Publish one update frame.
    pub async fn send_update(&mut self, update: &[u8]) -> Result<()> {
        let bytes = Frame::Update(update.to_vec().into()).encode();
        self.socket.send(Message::Binary(bytes.to_vec())).await?;
        Ok(())
    }

    /// Publish one awareness frame.
    pub async fn send_awareness(&mut self, payload: &[u8]) -> Result<()> {
        let bytes = Frame::Awareness(payload.to_vec().into()).encode();
        self.socket.send(Message::Binary(bytes.to_vec())).await?;
        Ok(())
    }

    /// Receive and absorb one message, waiting at most `timeout`. Returns
    /// false on timeout or a closed socket.
    pub async fn pump_once(&mut self, timeout: Duration) -> bool {
        let Ok(Some(Ok(msg))) = tokio::time::timeout(timeout, self.socket.next()).await else {
            return false;
        };
        if let Message::Binary(data) = msg {
            if let Ok(frames) = Frame::decode_all(&data) {
                for frame in frames {
                    match frame {
                        Frame::Update(update) => {
                            if self.doc.apply(&update) {
                                self.updates_applied += 1;
                            }
                        }
                        Frame::Awareness(payload) => {
                            self.awareness_seen.push(payload.to_vec());
                        }
                        _ => {}
                    }
                }
            }
        }
        true
    }

    /// Absorb everything that arrives within `duration`.
    pub async fn drain_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.pump_once(remaining).await {
                return;
            }
        }
    }

    /// Pump until this client's document state vector equals `target`.
    /// Returns false on timeout.
    pub async fn sync_until(&mut self, target: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.doc.state_vector() == target {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.pump_once(remaining).await;
        }
    }

    #[must_use]
    pub fn updates_applied(&self) -> usize {
        self.updates_applied
    }

    #[must_use]
    pub fn awareness_seen(&self) -> &[Vec<u8>] {
        &self.awareness_seen
    }

    /// Close the socket cleanly.
    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
