use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::db::models::UserRow;
use crate::engine::events::{AckBody, AckFrame, ClientEvent, InboundFrame, Outbound};
use crate::engine::hub::Connection;

use super::app_state::AppState;
use super::auth_middleware::{authenticate, token_from_parts, unauthorized};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Identity of a WebSocket client, established before the upgrade. Browsers
/// cannot set headers on a WebSocket handshake, so the token may also come
/// from the `token` query parameter.
pub struct WsUser(pub UserRow);

impl FromRequestParts<Arc<AppState>> for WsUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = match token_from_parts(parts, state).await {
            Some(token) => Some(token),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token),
        };
        let token = token.ok_or_else(|| unauthorized("not authenticated"))?;
        let user = authenticate(state, &token).await?;
        Ok(WsUser(user))
    }
}

/// `GET /ws`. Authentication runs before the upgrade; an unauthenticated
/// client never reaches an event handler.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    WsUser(user): WsUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: UserRow) {
    let (conn, mut outbound_rx) = state.hub.register(&user);
    let connection_id = conn.id;
    let (mut ws_sink, mut ws_stream) = socket.split();
    info!(%connection_id, user_id = %user.id, "websocket connected");

    // Writer: drains the outbound queue and keeps the connection alive.
    let ping_interval = state.realtime.ping_interval();
    let write_handle = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%connection_id, error = %e, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader: frames are handled one at a time, in arrival order. Any frame,
    // including a pong, counts as a sign of life.
    let ping_timeout = state.realtime.ping_timeout();
    loop {
        let next = match tokio::time::timeout(ping_timeout, ws_stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(%connection_id, "websocket timed out");
                break;
            }
        };
        match next {
            Some(Ok(Message::Text(text))) => handle_frame(&state, &conn, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%connection_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    state.service.disconnect(connection_id).await;
    drop(conn);
    write_handle.abort();
    info!(%connection_id, user_id = %user.id, "websocket disconnected");
}

/// Decode one inbound frame, run it, and acknowledge it if it asked for a
/// reply.
async fn handle_frame(state: &AppState, conn: &Connection, raw: &str) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = %conn.id, error = %e, "ignoring malformed frame");
            return;
        }
    };

    let ack_id = frame.ack_id;
    let result = match ClientEvent::parse(&frame.event, frame.data) {
        Ok(event) => state.service.dispatch(conn, event).await,
        Err(e) => Err(e),
    };

    if let Some(ack_id) = ack_id {
        let body = result.map_or_else(|e| AckBody::from_error(&e), AckBody::ok);
        state
            .hub
            .send_to(conn.id, Outbound::Ack(AckFrame::new(ack_id, body)));
    }
}
