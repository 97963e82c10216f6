use crate::{handlers::{diagnostics, health_check, ready_check, status}, routes::auth_middleware::auth_middleware, ws::{websocket_handler, Hub}};
use axum::{routing::get, Router, middleware};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(hub: Arc<Hub>) -> Router {
    let protected = Router::<Arc<Hub>>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(hub.clone(), auth_middleware)); // Applies to all routes added above

    Router::<Arc<Hub>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/status", get(status))
        .merge(protected)
        .with_state(hub)
}

/// Create the client channel route
pub fn create_ws_routes(hub: Arc<Hub>) -> Router {
    Router::<Arc<Hub>>::new()
        .route("/ws", get(websocket_handler))
        .with_state(hub)
}
