//! WebSocket connection handler.
//!
//! Provides the upgrade handler and the per-connection read/write loops.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use pulsecast_sdk::{ClientMessage, ProtocolError};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::ConnectionId;
use super::hub::HubHandle;
use super::metrics::WsMetrics;
use crate::auth::{Authenticator, Identity};

/// State shared by every upgrade request.
#[derive(Debug, Clone)]
pub struct WsState {
    /// Hub owning the registry.
    pub hub: HubHandle,
    /// Token verification.
    pub authenticator: Authenticator,
    /// Metrics.
    pub metrics: Arc<WsMetrics>,
    /// Outbound queue capacity per connection.
    pub send_buffer: usize,
}

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Credential verified before the upgrade.
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The token is verified before the upgrade headers are even looked at; a
/// rejected request gets `401` (or `503` if the identity provider is down)
/// and never reaches the registry.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<ConnectParams>,
    State(state): State<WsState>,
) -> Response {
    let identity = match state
        .authenticator
        .authenticate(params.token.as_deref())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            state.metrics.record_auth_failure();
            warn!(error = %e, "rejecting upgrade");
            return (e.status_code(), e.to_string()).into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_connection(socket, identity, state)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Handles an authenticated connection until either side closes it.
async fn handle_connection(socket: WebSocket, identity: Identity, state: WsState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.send_buffer);

    let id = match state.hub.register(identity.user_id.clone(), tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(user_id = %identity.user_id, error = %e, "hub unavailable, closing");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(conn_id = %id, user_id = %identity.user_id, "connection opened");

    // Runs until the registry drops the sender, then closes the socket.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(msg) => {
                        state.metrics.record_message_received();
                        if !handle_frame(msg, id, &state).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %id, error = %e, "transport error");
                        state.metrics.record_error();
                        break;
                    }
                }
            }
            _ = &mut writer => {
                debug!(conn_id = %id, "writer finished");
                break;
            }
        }
    }

    let _ = state.hub.disconnect(id).await;
    writer.abort();
    debug!(conn_id = %id, "connection task finished");
}

/// Handles one frame; returns false when the connection should end.
async fn handle_frame(msg: Message, id: ConnectionId, state: &WsState) -> bool {
    match msg {
        Message::Text(text) => match ClientMessage::decode(text.as_str()) {
            Ok(message) => state.hub.inbound(id, message).await.is_ok(),
            Err(e) => {
                reject_frame(id, &e, state);
                true
            }
        },
        Message::Binary(_) => {
            reject_frame(id, &ProtocolError::Binary, state);
            true
        }
        Message::Ping(_) | Message::Pong(_) => state.hub.acknowledge(id).await.is_ok(),
        Message::Close(_) => {
            debug!(conn_id = %id, "close requested");
            false
        }
    }
}

fn reject_frame(id: ConnectionId, error: &ProtocolError, state: &WsState) {
    state.metrics.record_malformed();
    match error {
        ProtocolError::UnknownType(tag) => {
            warn!(conn_id = %id, %tag, "ignoring unknown message type");
        }
        other => warn!(conn_id = %id, error = %other, "ignoring malformed frame"),
    }
}
