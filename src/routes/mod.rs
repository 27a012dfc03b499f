pub mod api;
pub mod ws;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;

/// Assemble public, protected and WebSocket routes with their middleware.
///
/// Layer order for `/ws` (outer to inner): connection_limit -> auth -> handler.
/// Requires `ConnectInfo<SocketAddr>`; serve with
/// `into_make_service_with_connect_info`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected_routes = api::create_api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    let ws_routes = ws::create_ws_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ));

    api::create_public_router()
        .merge(protected_routes)
        .merge(ws_routes)
        .with_state(state)
}
