use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Note store is reachable", body = ReadyResponse),
        (status = 503, description = "Note store is not reachable", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Online sessions, open notes and stored totals
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
        (status = 500, description = "Store could not be counted", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn status_doc() {}

/// Hub counters and process resource usage
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics snapshot", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid credentials")
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        status_doc,
        diagnostics_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, StatusResponse, DiagnosticsResponse, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
