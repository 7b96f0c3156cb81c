use crate::error::{Error, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use events::UserRole;
use futures::{SinkExt, StreamExt};
use log::*;
use notify::connection::{Channel, Connection, Outbound};
use notify::registry::SubscriberKey;
use service::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Opens a socket that manages its own subscriptions through control frames.
pub(crate) async fn ws_handler(
    State(app_state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, app_state, None))
}

/// Opens a socket already subscribed to one user's updates.
/// A bad role or blank id is rejected before the upgrade.
pub(crate) async fn subscriber_ws_handler(
    State(app_state): State<AppState>,
    Path((user_type, user_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let role: UserRole = user_type.parse()?;
    if user_id.trim().is_empty() {
        return Err(Error::invalid_subscriber("user_id must not be blank"));
    }
    let key = SubscriberKey::new(role, user_id);

    debug!("Upgrading WebSocket subscribed to {key}");
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, app_state, Some(key))))
}

async fn serve_socket(socket: WebSocket, app_state: AppState, key: Option<SubscriberKey>) {
    let manager = app_state.notify_manager.clone();
    let (connection, outbound) = Connection::new(app_state.config.outbound_queue_capacity);
    let channel: Arc<dyn Channel> = connection;

    if let Err(e) = manager.connect(channel.clone()).await {
        warn!("Failed to accept WebSocket connection: {e}");
        return;
    }
    if let Some(key) = key {
        manager.subscribe(channel.clone(), key);
    }

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_frames(
        sink,
        outbound,
        app_state.config.ws_ping_interval(),
    ));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = manager.handle_client_message(&channel, &text).await {
                    debug!("Could not reply to connection {}: {e}", channel.id());
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket error on connection {}: {e}", channel.id());
                break;
            }
        }
    }

    debug!("WebSocket connection {} closed, cleaning up", channel.id());
    if let Err(e) = manager.disconnect(channel.id()) {
        trace!("Connection {} was already removed: {e}", channel.id());
    }
    if let Err(e) = writer.await {
        warn!("WebSocket writer task failed: {e}");
    }
}

/// Drains queued frames into the socket and keeps idle sockets alive with pings.
/// Stops when the connection closes or the socket refuses a write.
async fn write_frames(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: Outbound,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    loop {
        let frame = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(text) => Message::Text(text),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(frame).await {
            debug!("Write to connection {} failed: {e}", outbound.id());
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Closing socket for connection {} failed: {e}", outbound.id());
    }
}
