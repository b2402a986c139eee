//! # Ops API
//!
//! Health, effective configuration and the OpenAPI document.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use super::workflow::{self, ErrorResponse, RunRequestBody, RunResponse};
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Opex API",
        version = "1.0.0",
        description = "Workflow diagram and procedure document generation"
    ),
    paths(workflow::run_workflow, workflow::chat, health, get_config),
    components(schemas(RunRequestBody, RunResponse, ErrorResponse, HealthResponse)),
    tags(
        (name = "workflow", description = "Pipeline runs"),
        (name = "ops", description = "Health and configuration")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub gateway: String,
    pub dispatch: String,
}

pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
}

/// Liveness plus the active collaborators
#[utoipa::path(
    get,
    path = "/health",
    tag = "ops",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        gateway: state.coordinator.gateway_name().to_string(),
        dispatch: state.coordinator.dispatch_name().to_string(),
    })
}

/// Effective configuration with secrets redacted
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "ops",
    responses((status = 200, description = "Effective configuration", content_type = "application/json"))
)]
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.redacted())
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}
