use std::sync::Arc;
use axum::{extract::State, http::StatusCode, Json};
use crate::models::{HealthResponse, ReadyResponse};
use crate::ws::Hub;
use tracing::{debug, warn};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint, ready once the note store answers
pub async fn ready_check(
    State(hub): State<Arc<Hub>>,
) -> (StatusCode, Json<ReadyResponse>) {
    debug!("Readiness check requested");
    match hub.status().await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ok".to_string(),
                message: "Service is ready".to_string(),
            }),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "unavailable".to_string(),
                    message: "Note store is not reachable".to_string(),
                }),
            )
        }
    }
}
