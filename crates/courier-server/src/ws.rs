//! WebSocket session handling.
//!
//! Each connection runs one session task: frames from the socket are
//! decoded and processed inline, while outbound frames arrive on the
//! connection's channel and are written back. The session never blocks on
//! other connections; fan-out elsewhere only pushes onto this session's
//! queue.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use courier_core::{App, AppStore, ChannelKind};
use courier_protocol::{
    codec, events::codes, events::names, is_supported, WireEvent,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upgrade handler for `GET /app/{app_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(app_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_id, params, state))
}

/// Send one frame and ignore transport errors; the read side will observe
/// the close and tear the session down.
async fn send_frame(sender: &mut (impl SinkExt<Message> + Unpin), event: &WireEvent) {
    if let Ok(bytes) = codec::encode(event) {
        metrics::record_message(bytes.len(), "outbound");
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let _ = sender.send(Message::Text(text)).await;
    }
}

async fn handle_socket(
    socket: WebSocket,
    app_id: String,
    params: HashMap<String, String>,
    state: Arc<AppState>,
) {
    let (mut sender, mut receiver) = socket.split();

    // A missing protocol parameter is tolerated; a stated one must be
    // within the supported range.
    if let Some(requested) = params.get("protocol") {
        let supported = requested
            .parse::<u8>()
            .is_ok_and(is_supported);
        if !supported {
            warn!(app = %app_id, protocol = %requested, "Unsupported protocol version");
            let frame = WireEvent::error(
                Some(codes::UNSUPPORTED_PROTOCOL),
                format!("Unsupported protocol version: {requested}"),
            );
            send_frame(&mut sender, &frame).await;
            let _ = sender.close().await;
            return;
        }
    }

    let app = match state.store.app_by_id(&app_id) {
        Ok(app) => app,
        Err(_) => {
            warn!(app = %app_id, "Connection for unknown application");
            let frame = WireEvent::error(
                Some(codes::APP_NOT_FOUND),
                format!("App {app_id} not found"),
            );
            send_frame(&mut sender, &frame).await;
            let _ = sender.close().await;
            return;
        }
    };

    if !app.is_enabled() {
        warn!(app = %app_id, "Connection for disabled application");
        let frame = WireEvent::error(Some(codes::APP_DISABLED), "Application disabled");
        send_frame(&mut sender, &frame).await;
        let _ = sender.close().await;
        return;
    }

    let _metrics_guard = metrics::ConnectionMetricsGuard::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let connection = app.connect(tx);
    let socket_id = connection.socket_id().to_string();

    debug!(app = %app_id, socket_id = %socket_id, "Connection established");

    let greeting = WireEvent::connection_established(
        &socket_id,
        state.config.heartbeat.activity_timeout_secs,
    );
    send_frame(&mut sender, &greeting).await;

    loop {
        tokio::select! {
            // Outbound frames queued by fan-out.
            outbound = rx.recv() => {
                let Some(bytes) = outbound else { break };
                metrics::record_message(bytes.len(), "outbound");
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        let reply = match codec::decode(&text) {
                            Ok(frame) => process_frame(&app, &socket_id, &frame),
                            Err(e) => {
                                debug!(socket_id = %socket_id, error = %e, "Undecodable frame");
                                Some(WireEvent::error(None, e.to_string()))
                            }
                        };
                        if let Some(reply) = reply {
                            send_frame(&mut sender, &reply).await;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sender.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(app = %app_id, socket_id = %socket_id, "Connection closed");
    app.disconnect(&socket_id);
}

/// Process one decoded inbound frame, returning a direct reply if any.
///
/// Broadcast side effects (presence events, client events) flow through
/// the connection registry, not the return value.
fn process_frame(app: &App, socket_id: &str, frame: &WireEvent) -> Option<WireEvent> {
    match frame.event.as_str() {
        names::PING => Some(WireEvent::pong()),
        names::PONG => None,
        names::SUBSCRIBE => Some(handle_subscribe(app, socket_id, frame)),
        names::UNSUBSCRIBE => {
            match frame.unsubscribe_payload() {
                Ok(payload) => {
                    app.unsubscribe(socket_id, &payload.channel);
                    None
                }
                Err(e) => Some(WireEvent::error(None, e.to_string())),
            }
        }
        name if courier_protocol::events::is_client_event(name) => {
            handle_client_event(app, socket_id, frame)
        }
        other => {
            debug!(socket_id = %socket_id, event = %other, "Unrecognized event");
            Some(WireEvent::error(
                None,
                format!("Unrecognized event: {other}"),
            ))
        }
    }
}

fn handle_subscribe(app: &App, socket_id: &str, frame: &WireEvent) -> WireEvent {
    let payload = match frame.subscribe_payload() {
        Ok(payload) => payload,
        Err(e) => return WireEvent::error(None, e.to_string()),
    };

    let kind = ChannelKind::of(&payload.channel);
    if kind.requires_auth() {
        let authorized = payload.auth.as_deref().is_some_and(|auth| {
            courier_core::auth::verify_subscription(
                auth,
                app.app_id(),
                app.secret(),
                socket_id,
                &payload.channel,
                payload.channel_data.as_deref(),
            )
        });
        if !authorized {
            warn!(socket_id = %socket_id, channel = %payload.channel, "Subscription auth failed");
            return WireEvent::error(Some(codes::NOT_AUTHORIZED), "Not authorized");
        }
    }

    let member = if kind.is_presence() {
        match payload.member() {
            Ok(member) => Some(member),
            Err(e) => return WireEvent::error(None, e.to_string()),
        }
    } else {
        None
    };

    match app.subscribe(socket_id, &payload.channel, member) {
        Ok(outcome) => {
            metrics::record_subscription();
            WireEvent::subscription_succeeded(&outcome.channel, outcome.presence)
        }
        Err(e) => WireEvent::error(None, e.to_string()),
    }
}

/// Client events may only flow on private and presence channels the
/// sender is subscribed to, and never reach the sender itself.
fn handle_client_event(app: &App, socket_id: &str, frame: &WireEvent) -> Option<WireEvent> {
    let Some(channel) = frame.channel.as_deref() else {
        return Some(WireEvent::error(None, "Client event requires a channel"));
    };

    if !ChannelKind::of(channel).requires_auth() {
        return Some(WireEvent::error(
            Some(codes::NOT_AUTHORIZED),
            "Client events are restricted to private and presence channels",
        ));
    }

    if !app.is_subscribed(socket_id, channel) {
        return Some(WireEvent::error(
            Some(codes::NOT_AUTHORIZED),
            format!("Not subscribed to {channel}"),
        ));
    }

    let data = frame.data.clone().unwrap_or(serde_json::Value::Null);
    match app.publish(channel, &frame.event, data, Some(socket_id)) {
        Ok(delivery) => {
            metrics::record_delivery_failures(delivery.failed);
            None
        }
        Err(e) => Some(WireEvent::error(None, e.to_string())),
    }
}
