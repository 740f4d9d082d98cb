// Real-time sync endpoint
//
// Persistent bidirectional connection, authenticated at handshake by the
// token minted by the external session service. Server-to-client frames
// are {type, data}; client-to-server supports ping/pong liveness and
// sync_request{last_event_id} for checkpoint replay.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use tasklane_sync::{ClientMessage, Frame, SyncBroadcaster};

use crate::auth::Authenticator;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<SyncBroadcaster>,
    pub auth: Authenticator,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/sync", get(ws_sync))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// GET /ws/sync?token=... - Upgrade to the real-time sync protocol
pub async fn ws_sync(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = state.auth.authenticate(&query.token) else {
        warn!("websocket authentication failed");
        return (StatusCode::UNAUTHORIZED, "authentication failed").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state.broadcaster))
}

async fn handle_socket(mut socket: WebSocket, user_id: String, broadcaster: Arc<SyncBroadcaster>) {
    let registry = broadcaster.registry().clone();
    let (connection_id, mut frames) = registry.register(&user_id);

    if send_frame(&mut socket, &Frame::connected()).await.is_err() {
        registry.unregister(&user_id, connection_id);
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(
                            &mut socket,
                            &broadcaster,
                            &user_id,
                            connection_id,
                            &text,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // transport-level ping/pong/binary
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(&user_id, connection_id);
}

async fn handle_client_message(
    socket: &mut WebSocket,
    broadcaster: &SyncBroadcaster,
    user_id: &str,
    connection_id: Uuid,
    text: &str,
) -> Result<(), axum::Error> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(user_id, error = %e, "unparseable client message");
            return send_frame(socket, &Frame::error("unsupported message")).await;
        }
    };

    match message {
        ClientMessage::Ping { data } => {
            broadcaster.registry().update_ping(user_id, connection_id);
            send_frame(socket, &Frame::pong(data["timestamp"].clone())).await
        }
        ClientMessage::Pong { .. } => {
            broadcaster.registry().update_ping(user_id, connection_id);
            Ok(())
        }
        ClientMessage::SyncRequest { data } => {
            let frames = broadcaster.catch_up(user_id, data.last_event_id);
            debug!(user_id, replayed = frames.len(), "sync_request served");
            for frame in frames {
                send_frame(socket, &frame).await?;
            }
            Ok(())
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
