use axum::{
    Router,
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{audio, documents, stats};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes
///
/// Note: Authentication middleware should be applied in main.rs after state is available
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduler/stats", get(stats::get_stats))
        .route(
            "/documents/{document_id}",
            put(documents::put_document)
                .get(documents::get_document)
                .delete(documents::delete_document),
        )
        .layer(TraceLayer::new_for_http())
}

/// Routes served without authentication
///
/// Audio is addressed by content fingerprint so `<audio>` elements can fetch
/// it without credentials.
pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(crate::handlers::api::health_check))
        .route("/audio/{fingerprint}", get(audio::get_audio))
        .layer(TraceLayer::new_for_http())
}
