use std::sync::Arc;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use crate::services::auth_service::get_auth_token;
use crate::ws::Hub;

/// Only signed-in callers pass; their identity lands in the request extensions.
pub async fn auth_middleware(
    State(hub): State<Arc<Hub>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // Get the auth token from the request
    let token = match get_auth_token(req.headers(), &hub.settings().auth_cookie_name) {
        Ok(token) => token,
        Err(e) => {
            debug!("Rejecting unauthenticated request: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // Resolve it the same way channel credentials are resolved
    let auth = hub.identity().resolve(Some(&token), false).await;
    if !auth.logged_in {
        warn!("Rejecting request with invalid credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}
