use std::sync::Arc;
use axum::{extract::State, http::StatusCode, Json};
use crate::models::{ErrorResponse, StatusResponse};
use crate::ws::Hub;
use tracing::error;

/// Online and stored counts for operational tooling
pub async fn status(
    State(hub): State<Arc<Hub>>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, Json<ErrorResponse>)> {
    match hub.status().await {
        Ok(status) => Ok((StatusCode::OK, Json(status))),
        Err(e) => {
            error!("Failed to collect status: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    status: "error".to_string(),
                    error: "Failed to collect status".to_string(),
                }),
            ))
        }
    }
}
