use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    extract::{ConnectInfo, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hub::Hub;
use super::session::{Channel, Outbound};
use crate::models::ClientEvent;
use crate::services::auth_service::get_auth_token;

/// Handshake data captured before the upgrade
struct Handshake {
    address: String,
    user_agent: Option<String>,
    referer: Option<String>,
    credentials: Option<String>,
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<Hub>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let handshake = Handshake {
        address: connect_info
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        user_agent: header_value(&headers, header::USER_AGENT),
        referer: header_value(&headers, header::REFERER),
        credentials: get_auth_token(&headers, &hub.settings().auth_cookie_name).ok(),
    };
    debug!("New WebSocket connection attempt from {}", handshake.address);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, handshake))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, handshake: Handshake) {
    let session_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut queue) = mpsc::unbounded_channel::<Outbound>();

    let auth = hub
        .identity()
        .resolve(handshake.credentials.as_deref(), false)
        .await;
    let channel = Channel {
        id: session_id.clone(),
        outbox,
        address: handshake.address,
        user_agent: handshake.user_agent,
        referer: handshake.referer,
        credentials: handshake.credentials,
    };
    hub.register(channel, &auth).await;
    info!("WebSocket connection established with session_id: {}", session_id);

    // Drain the session outbox into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(item) = queue.recv().await {
            let event = match item {
                Outbound::Event(event) => event,
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Admission runs before inbound events are read
    if hub.connect(&session_id).await.is_err() {
        // the 404 and close are queued; let the sender flush them
        let _ = send_task.await;
        hub.disconnect(&session_id).await;
        return;
    }

    let recv_hub = hub.clone();
    let recv_id = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match ClientEvent::from_text(&text) {
                Ok(event) => recv_hub.handle_event(&recv_id, event).await,
                Err(e) => warn!("Failed to parse message from {}: {}", recv_id, e),
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    hub.disconnect(&session_id).await;
    info!("WebSocket connection terminated for session_id: {}", session_id);
}
