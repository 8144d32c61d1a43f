//! HTTP route handlers.
//!
//! Serves the grid page, the session REST API and the WebSocket that browser
//! peers use to read and write a session's shared document.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::models::{default_columns, default_rows, SessionId, GRID_DATA_KEY};
use crate::rooms::BroadcastKind;
use crate::templates::render_grid_page;
use crate::AppState;

// ============================================================================
// Wire Protocol
// ============================================================================

/// Messages sent from the server to a browser peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        id: SessionId,
        #[serde(rename = "gridData")]
        grid_data: Option<serde_json::Value>,
        peers: usize,
    },
    ValueChanged {
        key: String,
        value: serde_json::Value,
    },
    Peers {
        count: usize,
    },
}

/// Messages sent from a browser peer to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Set {
        key: String,
        value: serde_json::Value,
    },
}

fn error_response(e: SyncError) -> Response {
    match e {
        SyncError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "Session not found").into_response(),
        other => {
            tracing::error!(error = %other, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response()
        }
    }
}

// ============================================================================
// Page Handler
// ============================================================================

/// GET / - The grid page. The session is chosen client-side from the fragment.
pub async fn index() -> Html<String> {
    Html(render_grid_page(&default_columns(), &default_rows()))
}

// ============================================================================
// REST Handlers
// ============================================================================

/// POST /api/sessions - Allocate a new session.
pub async fn create_session(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.create_room().await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": id,
                "url": format!("/#{}", id),
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/sessions/{id} - Current snapshot and peer count.
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = SessionId::new(id);
    let grid_data = match state.registry.get_value(&id, GRID_DATA_KEY).await {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    let peers = state.registry.peer_count(&id).await;

    Json(serde_json::json!({
        "id": id,
        "peers": peers,
        "gridData": grid_data,
    }))
    .into_response()
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// GET /api/sessions/{id}/ws - WebSocket upgrade for real-time sync.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let id = SessionId::new(id);
    match state.registry.exists(&id).await {
        Ok(true) => {}
        Ok(false) => return error_response(SyncError::SessionNotFound(id.to_string())),
        Err(e) => return error_response(e),
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state, id))
}

/// Convert a room broadcast into what `peer` should be sent, if anything.
/// A peer never gets its own writes echoed back.
fn outgoing_message(peer: u64, sender_id: u64, kind: BroadcastKind) -> Option<ServerMessage> {
    if sender_id == peer {
        return None;
    }
    Some(match kind {
        BroadcastKind::ValueChanged { key, value } => ServerMessage::ValueChanged { key, value },
        BroadcastKind::PeersUpdate(count) => ServerMessage::Peers { count },
    })
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>, id: SessionId) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let conn = match state.registry.connect(&id).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "websocket join failed");
            return;
        }
    };
    let my_id = conn.peer_id;
    let mut broadcast_rx = conn.rx;

    // The connect broadcast went out before this peer subscribed, so the
    // count is carried in the init message
    let grid_data = state
        .registry
        .get_value(&id, GRID_DATA_KEY)
        .await
        .ok()
        .flatten();
    let init = ServerMessage::Init {
        id: id.clone(),
        grid_data,
        peers: conn.peers,
    };

    let init_sent = match serde_json::to_string(&init) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    };

    if init_sent {
        let forward_id = id.clone();
        let mut forward_task = tokio::spawn(async move {
            loop {
                let msg = match broadcast_rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %forward_id, peer = my_id, skipped, "peer lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(out) = outgoing_message(my_id, msg.sender_id, msg.kind) else {
                    continue;
                };
                let Ok(json) = serde_json::to_string(&out) else {
                    continue;
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        // Read messages from client
        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::Set { key, value }) => {
                                    if let Err(e) = state.registry.set_value(&id, &key, value, my_id).await {
                                        tracing::warn!(session = %id, peer = my_id, error = %e, "failed to store value");
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(session = %id, peer = my_id, error = %e, "ignoring unknown message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!(session = %id, peer = my_id, error = %e, "websocket error");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = &mut forward_task => break,
            }
        }

        forward_task.abort();
    }

    if let Err(e) = state.registry.disconnect(&id, my_id).await {
        tracing::warn!(session = %id, error = %e, "failed to disconnect peer");
    }
}

// ============================================================================
// Tests
// ============================================================================
