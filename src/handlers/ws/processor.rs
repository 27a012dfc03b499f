//! WebSocket message processing
//!
//! Routes each parsed control message to the scheduler and answers on the
//! connection's outgoing channel. Later status transitions arrive through the
//! completion notifier, not through these handlers.

use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::auth::{Auth, match_api_secret_id};
use crate::core::fingerprint::{AudioFormat, RenderParams};
use crate::core::scheduler::SynthesisRequest;
use crate::state::AppState;

use super::{
    messages::{IncomingMessage, MessageRoute, OutgoingMessage},
    state::ConnectionState,
};

/// Fields of a `synthesize` message after parsing.
pub struct SynthesizeArgs {
    pub document_id: String,
    pub block_indices: Vec<usize>,
    pub cursor: usize,
    pub model: String,
    pub voice: String,
    pub speed: Option<f32>,
    pub format: Option<AudioFormat>,
    pub sample_rate: Option<u32>,
}

/// Process an incoming control message.
///
/// Returns `false` when the connection should be closed.
#[inline]
pub async fn handle_incoming_message(
    msg: IncomingMessage,
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    {
        let conn_state = state.read().await;
        if conn_state.auth.is_pending() && !matches!(msg, IncomingMessage::Auth { .. }) {
            warn!(
                connection_id = %conn_state.connection_id,
                "Received non-auth message while auth is pending, rejecting"
            );
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::error(
                    "auth_required",
                    "Authentication required. Send auth message first.",
                )))
                .await;
            let _ = message_tx.send(MessageRoute::Close).await;
            return false;
        }
    }

    match msg {
        IncomingMessage::Auth { token } => {
            handle_auth_message(token, state, message_tx, app_state).await
        }
        IncomingMessage::Synthesize {
            document_id,
            block_indices,
            cursor,
            model,
            voice,
            speed,
            format,
            sample_rate,
        } => {
            let args = SynthesizeArgs {
                document_id,
                block_indices,
                cursor,
                model,
                voice,
                speed,
                format,
                sample_rate,
            };
            handle_synthesize_message(args, state, message_tx, app_state).await
        }
        IncomingMessage::CursorMoved {
            document_id,
            cursor,
        } => handle_cursor_moved(document_id, cursor, state, message_tx, app_state).await,
    }
}

/// Validate the first-message token and mark the connection authenticated.
async fn handle_auth_message(
    token: String,
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    if !state.read().await.auth.is_pending() {
        debug!("Auth message on an authenticated connection, ignoring");
        let id = state.read().await.auth.id.clone();
        let _ = message_tx
            .send(MessageRoute::Outgoing(OutgoingMessage::Authenticated { id }))
            .await;
        return true;
    }

    if !app_state.config.has_api_secret_auth() {
        warn!("First-message auth attempted but API secret auth not configured");
        let _ = message_tx
            .send(MessageRoute::Outgoing(OutgoingMessage::error(
                "auth_unavailable",
                "API secret authentication not configured",
            )))
            .await;
        let _ = message_tx.send(MessageRoute::Close).await;
        return false;
    }

    match match_api_secret_id(&token, &app_state.config.auth_api_secrets) {
        Some(secret_id) => {
            let secret_id = secret_id.to_string();
            info!(auth_id = %secret_id, "First-message authentication successful");

            state.write().await.auth = Auth::new(secret_id.clone());

            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::Authenticated {
                    id: Some(secret_id),
                }))
                .await;
            true
        }
        None => {
            warn!("First-message authentication failed: invalid token");
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::error(
                    "unauthorized",
                    "Invalid authentication token",
                )))
                .await;
            let _ = message_tx.send(MessageRoute::Close).await;
            false
        }
    }
}

async fn connection_user(
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
) -> Option<String> {
    let user_id = state.read().await.user_id();
    if user_id.is_none() {
        let _ = message_tx
            .send(MessageRoute::Outgoing(OutgoingMessage::error(
                "auth_required",
                "Authentication required. Send auth message first.",
            )))
            .await;
    }
    user_id
}

/// Hand a batch of blocks to the scheduler and send the immediate statuses.
async fn handle_synthesize_message(
    args: SynthesizeArgs,
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    let Some(user_id) = connection_user(state, message_tx).await else {
        return true;
    };

    state
        .write()
        .await
        .documents
        .insert(args.document_id.clone());

    let model = args.model.clone();
    let request = SynthesisRequest {
        user_id,
        document_id: args.document_id,
        block_indices: args.block_indices,
        cursor: args.cursor,
        model: args.model,
        voice: args.voice,
        params: RenderParams {
            speed: args.speed.unwrap_or(1.0),
            format: args.format.unwrap_or_default(),
            sample_rate: args.sample_rate,
        },
    };

    debug!(
        user_id = %request.user_id,
        document_id = %request.document_id,
        blocks = request.block_indices.len(),
        cursor = request.cursor,
        model = %request.model,
        "Synthesize request"
    );

    match app_state.scheduler.request_blocks(request).await {
        Ok(outcome) => {
            for status in outcome.statuses {
                if message_tx
                    .send(MessageRoute::Outgoing(OutgoingMessage::Status(status)))
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            if let Some(reason) = outcome.degraded {
                let _ = message_tx
                    .send(MessageRoute::Outgoing(OutgoingMessage::Degraded {
                        reason,
                        model: Some(model),
                    }))
                    .await;
            }
        }
        Err(e) => {
            warn!(model = %model, error = %e, "Synthesize request rejected");
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::error(
                    e.code(),
                    e.to_string(),
                )))
                .await;
        }
    }
    true
}

/// Record the new cursor. Evictions reach every connection of the user through the notifier.
async fn handle_cursor_moved(
    document_id: String,
    cursor: usize,
    state: &Arc<RwLock<ConnectionState>>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    let Some(user_id) = connection_user(state, message_tx).await else {
        return true;
    };
    state.write().await.documents.insert(document_id.clone());

    let evicted = app_state
        .scheduler
        .move_cursor(&user_id, &document_id, cursor);
    if !evicted.is_empty() {
        debug!(
            user_id = %user_id,
            document_id = %document_id,
            cursor,
            evicted = evicted.len(),
            "Cursor moved, blocks evicted"
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthApiSecret, test_config};
    use crate::core::scheduler::{BlockStatus, SessionKey};

    async fn setup(
        auth: Auth,
        configure: impl FnOnce(&mut crate::config::ServerConfig),
    ) -> (
        Arc<AppState>,
        Arc<RwLock<ConnectionState>>,
        mpsc::Sender<MessageRoute>,
        mpsc::Receiver<MessageRoute>,
    ) {
        let mut config = test_config();
        configure(&mut config);
        let app_state = AppState::new(config).await.unwrap();
        app_state.documents.insert(
            "book",
            vec!["First.".to_string(), "Second.".to_string(), "Third.".to_string()],
        );
        let state = Arc::new(RwLock::new(ConnectionState::new(
            "conn-1".to_string(),
            auth,
            "anon-conn-1".to_string(),
        )));
        let (tx, rx) = mpsc::channel(64);
        (app_state, state, tx, rx)
    }

    fn synthesize(indices: Vec<usize>, model: &str) -> IncomingMessage {
        IncomingMessage::Synthesize {
            document_id: "book".to_string(),
            block_indices: indices,
            cursor: 0,
            model: model.to_string(),
            voice: "alloy".to_string(),
            speed: None,
            format: None,
            sample_rate: None,
        }
    }

    #[tokio::test]
    async fn test_pending_auth_rejects_other_messages() {
        let (app_state, state, tx, mut rx) = setup(Auth::pending(), |_| {}).await;

        let keep_open =
            handle_incoming_message(synthesize(vec![0], "default"), &state, &tx, &app_state).await;
        assert!(!keep_open);

        match rx.recv().await {
            Some(MessageRoute::Outgoing(OutgoingMessage::Error { code, .. })) => {
                assert_eq!(code, "auth_required")
            }
            other => panic!("Expected error, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(MessageRoute::Close)));
    }

    #[tokio::test]
    async fn test_first_message_auth() {
        let (app_state, state, tx, mut rx) = setup(Auth::pending(), |config| {
            config.auth_required = true;
            config.auth_api_secrets = vec![AuthApiSecret {
                id: "reader".to_string(),
                secret: "s3cret".to_string(),
            }];
        })
        .await;

        let wrong = IncomingMessage::Auth {
            token: "nope".to_string(),
        };
        assert!(!handle_incoming_message(wrong, &state, &tx, &app_state).await);
        assert!(matches!(
            rx.recv().await,
            Some(MessageRoute::Outgoing(OutgoingMessage::Error { .. }))
        ));
        assert!(matches!(rx.recv().await, Some(MessageRoute::Close)));

        let right = IncomingMessage::Auth {
            token: "s3cret".to_string(),
        };
        assert!(handle_incoming_message(right, &state, &tx, &app_state).await);
        match rx.recv().await {
            Some(MessageRoute::Outgoing(OutgoingMessage::Authenticated { id })) => {
                assert_eq!(id.as_deref(), Some("reader"))
            }
            other => panic!("Expected authenticated, got {other:?}"),
        }
        assert_eq!(state.read().await.user_id().as_deref(), Some("reader"));
    }

    #[tokio::test]
    async fn test_synthesize_sends_queued_statuses() {
        let (app_state, state, tx, mut rx) = setup(Auth::empty(), |_| {}).await;

        assert!(
            handle_incoming_message(synthesize(vec![1, 0], "default"), &state, &tx, &app_state)
                .await
        );

        let mut seen = Vec::new();
        for _ in 0..2 {
            match rx.recv().await {
                Some(MessageRoute::Outgoing(OutgoingMessage::Status(update))) => {
                    assert_eq!(update.status, BlockStatus::Queued);
                    seen.push(update.block_idx);
                }
                other => panic!("Expected status, got {other:?}"),
            }
        }
        assert_eq!(seen, vec![0, 1]);
        assert!(state.read().await.tracks("book"));
        assert_eq!(
            app_state
                .scheduler
                .intents()
                .pending(&SessionKey::new("anon-conn-1", "book")),
            2
        );
    }

    #[tokio::test]
    async fn test_unknown_model_is_an_error_frame() {
        let (app_state, state, tx, mut rx) = setup(Auth::empty(), |_| {}).await;

        assert!(
            handle_incoming_message(synthesize(vec![0], "nobody"), &state, &tx, &app_state).await
        );
        match rx.recv().await {
            Some(MessageRoute::Outgoing(OutgoingMessage::Error { code, .. })) => {
                assert_eq!(code, "unknown_model")
            }
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cursor_moved_evicts_far_blocks() {
        let (app_state, state, tx, _rx) = setup(Auth::empty(), |_| {}).await;
        let mut updates = app_state.scheduler.notifier().subscribe("anon-conn-1");

        handle_incoming_message(synthesize(vec![0, 1, 2], "default"), &state, &tx, &app_state)
            .await;

        let moved = IncomingMessage::CursorMoved {
            document_id: "book".to_string(),
            cursor: 100,
        };
        assert!(handle_incoming_message(moved, &state, &tx, &app_state).await);

        let mut evicted = Vec::new();
        while let Ok(update) = updates.try_recv() {
            if update.status == BlockStatus::Evicted {
                evicted.push(update.block_idx);
            }
        }
        evicted.sort_unstable();
        assert_eq!(evicted, vec![0, 1, 2]);
    }
}
