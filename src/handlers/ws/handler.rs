//! WebSocket control channel handler
//!
//! One socket per listening client. Incoming frames are routed to the
//! processor; status updates for the connection's user are forwarded from the
//! completion notifier for the documents this connection is reading.

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::{Duration, MissedTickBehavior};
use tokio::select;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Auth;
use crate::core::scheduler::StatusUpdate;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::{
    messages::{IncomingMessage, MessageRoute, OutgoingMessage},
    processor::handle_incoming_message,
    state::ConnectionState,
};

/// Outgoing channel buffer per connection
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Control frames are small JSON documents
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const BASE_IDLE_SECS: u64 = 300;
const IDLE_JITTER_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Stable identity for anonymous listeners when auth is disabled
    pub user_id: Option<String>,
}

/// Upgrade to the control channel.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
    Query(params): Query<WsParams>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(
        auth_id = ?auth.id,
        pending = auth.is_pending(),
        "WebSocket connection upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_ws_socket(socket, state, auth, params, client_ip))
}

/// Idle timeout of 300s with up to 30s of jitter either way so stale
/// connections from one burst are not all closed together.
fn idle_timeout_for(connection: &Uuid) -> Duration {
    let offset = (connection.as_u128() % (IDLE_JITTER_SECS as u128 * 2)) as u64;
    Duration::from_secs(BASE_IDLE_SECS - IDLE_JITTER_SECS + offset)
}

/// Receive the next update for this user, or wait forever when not subscribed.
async fn next_update(
    subscription: &mut Option<broadcast::Receiver<StatusUpdate>>,
) -> Result<StatusUpdate, broadcast::error::RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_ws_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    auth: Auth,
    params: WsParams,
    client_ip: Option<ClientIp>,
) {
    let connection = Uuid::new_v4();
    let connection_id = connection.to_string();
    let anonymous_user = params
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{connection_id}"));

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close);

            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Close => {
                    debug!("Closing WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let state = Arc::new(RwLock::new(ConnectionState::new(
        connection_id.clone(),
        auth,
        anonymous_user,
    )));

    let user_id = state.read().await.user_id();
    let mut subscription = user_id
        .as_deref()
        .map(|user| app_state.scheduler.notifier().subscribe(user));

    info!(
        connection_id = %connection_id,
        user_id = ?user_id,
        "WebSocket connection established"
    );

    let _ = message_tx
        .send(MessageRoute::Outgoing(OutgoingMessage::Ready {
            connection_id: connection_id.clone(),
            user_id,
        }))
        .await;

    let idle_timeout = idle_timeout_for(&connection);
    let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    idle_check.reset();
    let mut last_activity = Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_message(msg, &state, &message_tx, &app_state).await {
                            break;
                        }
                        if subscription.is_none()
                            && let Some(user) = state.read().await.user_id()
                        {
                            debug!(connection_id = %connection_id, user_id = %user, "Subscribing after first-message auth");
                            subscription = Some(app_state.scheduler.notifier().subscribe(&user));
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(connection_id = %connection_id, "WebSocket connection closed by client");
                        break;
                    }
                }
            }
            update = next_update(&mut subscription) => {
                match update {
                    Ok(update) => {
                        if !state.read().await.tracks(&update.document_id) {
                            continue;
                        }
                        if message_tx
                            .send(MessageRoute::Outgoing(OutgoingMessage::Status(update)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Dropped updates are recovered by the client's status timeout
                        warn!(connection_id = %connection_id, skipped, "Status subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        subscription = None;
                    }
                }
            }
            _ = idle_check.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        connection_id = %connection_id,
                        "WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(MessageRoute::Outgoing(OutgoingMessage::error(
                            "idle_timeout",
                            "Connection closed due to inactivity",
                        )))
                        .await;
                    let _ = message_tx.send(MessageRoute::Close).await;
                    break;
                }
            }
        }
    }

    drop(subscription);
    if let Some(ClientIp(ip)) = client_ip {
        app_state.release_connection(ip);
    }

    // Let queued frames (a final error or close) flush before tearing down
    drop(message_tx);
    if tokio::time::timeout(Duration::from_secs(1), &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    info!(connection_id = %connection_id, "WebSocket connection terminated");
}

/// Parse and dispatch one frame. Returns `false` to close the connection.
#[inline(always)]
async fn process_message(
    msg: Message,
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            let incoming: IncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse control message: {}", e);
                    let _ = message_tx
                        .send(MessageRoute::Outgoing(OutgoingMessage::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        )))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate() {
                warn!("Message validation failed: {}", e);
                let _ = message_tx
                    .send(MessageRoute::Outgoing(OutgoingMessage::error(
                        "validation_error",
                        e.to_string(),
                    )))
                    .await;
                return true;
            }

            handle_incoming_message(incoming, state, message_tx, app_state).await
        }
        Message::Binary(data) => {
            debug!("Ignoring binary frame: {} bytes", data.len());
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::error(
                    "unsupported_frame",
                    "Binary frames are not accepted on the control channel",
                )))
                .await;
            true
        }
        Message::Ping(_) => {
            debug!("Received ping");
            true
        }
        Message::Pong(_) => {
            debug!("Received pong");
            true
        }
        Message::Close(_) => {
            info!("WebSocket close received");
            false
        }
    }
}
