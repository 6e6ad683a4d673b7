use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use huddle_types::events::RealtimeEvent;
use huddle_types::token::TokenKeys;

use crate::registry::{ChannelKey, ChannelRegistry};

/// Abnormal close: missing token or otherwise unusable handshake parameters.
pub const CLOSE_INVALID_PARAMS: u16 = 4001;
/// Abnormal close: the presented token failed verification.
pub const CLOSE_INVALID_TOKEN: u16 = 4002;

/// Handshake query parameters from the upgrade request.
#[derive(Debug, Default)]
pub struct HandshakeParams {
    pub token: Option<String>,
    pub channel_id: Option<String>,
}

/// Drive one WebSocket connection: authenticate the handshake, register the
/// connection into its bucket, then pump broadcast payloads out until the
/// peer goes away. Cleanup runs exactly once no matter how the socket dies.
pub async fn handle_connection(
    socket: WebSocket,
    registry: ChannelRegistry,
    keys: Arc<TokenKeys>,
    params: HandshakeParams,
) {
    let channel_key = ChannelKey::from_param(params.channel_id.as_deref());

    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        close_with(socket, CLOSE_INVALID_PARAMS, "missing token").await;
        return;
    };

    let claims = match keys.verify_access(&token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("gateway handshake rejected: {}", e);
            close_with(socket, CLOSE_INVALID_TOKEN, "token verification failed").await;
            return;
        }
    };
    let user_id = claims.sub;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn_id = registry.join(user_id, channel_key, tx).await;

    info!("user {} connected to {:?} as {}", user_id, channel_key, conn_id);

    // Confirm the handshake before any broadcast can reach this connection's
    // outbound queue.
    let connected = RealtimeEvent::Connected {
        channel_id: channel_key.channel_id(),
        user_id,
    };
    match serde_json::to_string(&connected) {
        Ok(json) => {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                registry.leave(conn_id).await;
                return;
            }
        }
        Err(e) => warn!("failed to serialize connected event: {}", e),
    }

    // Forward queued broadcast payloads to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        // Registry dropped our sender (shutdown): say goodbye politely.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // The transport is server-push only; inbound frames are drained so pings
    // and close frames are processed.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Both the close and error paths funnel here; leave() is idempotent.
    registry.leave(conn_id).await;
    info!("user {} disconnected from {:?}", user_id, channel_key);
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
