//! WebSocket handler
//!
//! Session lifecycle: upgrade, authenticate, subscribe, then pump frames
//! both directions until something ends the session. Receive, send and
//! keepalive each run as their own task; the first to finish tears the
//! session down.

use crate::connection::{CloseCode, Connection, OUTBOUND_BUFFER};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use collab_common::{Authenticated, Permission};
use collab_core::crdt::DocState;
use collab_core::protocol::Frame;
use collab_core::room::RoomId;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// WebSocket-level ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions missing two consecutive pongs are closed.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// How long an un-tokened client may take to present an auth frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket gateway handler for `GET /{room}?token=...`.
pub async fn sync_handler(
    State(state): State<GatewayState>,
    Path(room): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = params.get("token").cloned();
    ws.on_upgrade(move |socket| handle_socket(state, socket, room, token))
}

/// Drive one upgraded WebSocket connection to completion.
async fn handle_socket(state: GatewayState, socket: WebSocket, room_name: String, token: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let authed = match authenticate(&state, &mut ws_sink, &mut ws_stream, &room_name, token).await {
        Ok(authed) => authed,
        Err(code) => {
            tracing::info!(room = %room_name, close_code = %code, "session rejected");
            send_close(&mut ws_sink, code).await;
            return;
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let room = RoomId::index(&room_name);
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let connection = Connection::new(session_id.clone(), room, authed, tx);

    state.manager().add(connection.clone());
    if let Err(e) = state.subscriber().subscribe(&connection).await {
        tracing::error!(session_id = %session_id, error = %e, "initial sync failed");
        cleanup(&state, &connection);
        send_close(&mut ws_sink, CloseCode::GoingAway).await;
        return;
    }

    // Send task: drains the outbound channel, or emits the close frame the
    // moment any other component requests one.
    let closer = connection.closer();
    let send_task = tokio::spawn(async move {
        let mut rx = rx;
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => {
                        if ws_sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                code = closer.closed() => {
                    let _ = ws_sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    // Receive task: client frames in, close code out (if any).
    let recv_state = state.clone();
    let recv_conn = connection.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    if let Err(code) = handle_frames(&recv_state, &recv_conn, &data).await {
                        return Some(code);
                    }
                }
                Ok(Message::Text(_)) => {
                    tracing::debug!(
                        session_id = %recv_conn.session_id(),
                        "text frame on a binary-only endpoint"
                    );
                    return Some(CloseCode::UnsupportedData);
                }
                Ok(Message::Ping(_)) => {
                    // Pong is produced by axum automatically.
                }
                Ok(Message::Pong(_)) => recv_conn.record_pong(),
                Ok(Message::Close(_)) => return None,
                Err(e) => {
                    tracing::debug!(
                        session_id = %recv_conn.session_id(),
                        error = %e,
                        "websocket receive error"
                    );
                    return None;
                }
            }
        }
        None
    });

    // Keepalive task: ping every interval, bail out once the client misses
    // two of them.
    let ping_conn = connection.clone();
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if ping_conn.is_unresponsive(PONG_TIMEOUT) {
                tracing::info!(
                    session_id = %ping_conn.session_id(),
                    "session unresponsive, closing"
                );
                return;
            }
            if !ping_conn.send_ping() {
                return;
            }
        }
    });

    let close_code = tokio::select! {
        result = recv_task => result.ok().flatten(),
        _ = send_task => None,
        _ = ping_task => Some(CloseCode::GoingAway),
    };

    if let Some(code) = close_code {
        connection.close(code);
    } else {
        connection.close(CloseCode::Normal);
    }
    cleanup(&state, &connection);
    tracing::info!(session_id = %session_id, "session ended");
}

/// Resolve the session's identity: token from the URL when present,
/// otherwise challenge for an auth-reply frame.
async fn authenticate(
    state: &GatewayState,
    ws_sink: &mut SplitSink<WebSocket, Message>,
    ws_stream: &mut SplitStream<WebSocket>,
    room: &str,
    token: Option<String>,
) -> Result<Authenticated, CloseCode> {
    let token = match token {
        Some(token) => token,
        None => {
            let challenge = Frame::AuthRequest(Bytes::new()).encode();
            if ws_sink.send(Message::Binary(challenge)).await.is_err() {
                return Err(CloseCode::GoingAway);
            }
            match tokio::time::timeout(AUTH_TIMEOUT, read_auth_reply(ws_stream)).await {
                Ok(Some(token)) => token,
                _ => return Err(CloseCode::AuthFailed),
            }
        }
    };

    state.auth().check(&token, room).await.map_err(|e| {
        tracing::info!(room = %room, error = %e, "authentication failed");
        CloseCode::AuthFailed
    })
}

/// Wait for the first auth-reply frame. Any protocol violation ends the
/// attempt.
async fn read_auth_reply(ws_stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let frames = Frame::decode_all(&data).ok()?;
                for frame in frames {
                    if let Frame::AuthReply(token) = frame {
                        return Some(String::from_utf8_lossy(&token).into_owned());
                    }
                }
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(_) => return None,
            Err(_) => return None,
        }
    }
    None
}

/// Process one binary message worth of frames from a client.
async fn handle_frames(
    state: &GatewayState,
    conn: &Arc<Connection>,
    data: &[u8],
) -> Result<(), CloseCode> {
    let frames = Frame::decode_all(data).map_err(|e| {
        tracing::warn!(
            session_id = %conn.session_id(),
            error = %e,
            "unparseable message"
        );
        CloseCode::UnsupportedData
    })?;

    for frame in frames {
        match frame {
            Frame::SyncStep1(remote_sv) => handle_sync_step1(state, conn, &remote_sv).await,
            Frame::Update(update) => handle_update(state, conn, update).await?,
            Frame::Awareness(payload) => {
                // Broadcast to local peers only; never persisted.
                let bytes = Frame::Awareness(payload).encode();
                state
                    .subscriber()
                    .send_to_room(conn.room(), bytes, Some(conn.session_id()));
            }
            Frame::AuthReply(_) => {
                tracing::trace!(
                    session_id = %conn.session_id(),
                    "auth reply after authentication, ignored"
                );
            }
            Frame::AuthRequest(_) => {
                tracing::debug!(
                    session_id = %conn.session_id(),
                    "client sent a server-only frame, ignored"
                );
            }
        }
    }
    Ok(())
}

/// Answer a client's state vector with the diff it is missing, plus our own
/// state vector so it can reciprocate.
async fn handle_sync_step1(state: &GatewayState, conn: &Arc<Connection>, remote_sv: &[u8]) {
    let view = match state.api().get_doc(conn.room()).await {
        Ok(view) => view,
        Err(e) => {
            // Transient; the client will retry its sync.
            tracing::warn!(room = %conn.room(), error = %e, "doc retrieval failed");
            return;
        }
    };
    let diff = match view.doc.diff(remote_sv) {
        Ok(diff) => diff,
        // Undecodable state vector: fall back to the full state.
        Err(_) => view.doc.encode_update(),
    };
    let reply = Frame::encode_all(&[
        Frame::Update(diff.into()),
        Frame::SyncStep1(view.doc.state_vector().into()),
    ]);
    conn.send_bytes(reply);
}

/// Broadcast an update to local peers and publish it to the room stream.
async fn handle_update(
    state: &GatewayState,
    conn: &Arc<Connection>,
    update: Bytes,
) -> Result<(), CloseCode> {
    if conn.permission() == Permission::ReadOnly {
        tracing::debug!(
            session_id = %conn.session_id(),
            room = %conn.room(),
            "update from read-only session dropped"
        );
        return Ok(());
    }

    if DocState::validate_update(&update).is_err() {
        tracing::warn!(
            session_id = %conn.session_id(),
            room = %conn.room(),
            "undecodable update payload"
        );
        return Err(CloseCode::UnsupportedData);
    }

    // Local peers first, then the shared log.
    let bytes = Frame::Update(update.clone()).encode();
    state
        .subscriber()
        .send_to_room(conn.room(), bytes, Some(conn.session_id()));

    state.subscriber().begin_publish(conn.room());
    match state.api().add_update(conn.room(), &update).await {
        Ok(id) => {
            state
                .subscriber()
                .register_echo(conn.room(), id, conn.session_id());
        }
        Err(e) => {
            // Transient infrastructure failure: the local broadcast already
            // happened and the client keeps the update in its own doc; it
            // re-publishes after reconnecting.
            tracing::error!(room = %conn.room(), error = %e, "publish failed");
        }
    }
    state.subscriber().end_publish(conn.room());
    Ok(())
}

/// Best-effort close frame outside the normal session teardown.
async fn send_close(ws_sink: &mut SplitSink<WebSocket, Message>, code: CloseCode) {
    let _ = ws_sink
        .send(Message::Close(Some(CloseFrame {
            code: code.as_u16(),
            reason: "".into(),
        })))
        .await;
    let _ = ws_sink.close().await;
}

/// Drop a session from the manager and every table it appears in.
fn cleanup(state: &GatewayState, connection: &Arc<Connection>) {
    state.subscriber().unsubscribe(connection);
    state.manager().remove(connection.session_id());
}
