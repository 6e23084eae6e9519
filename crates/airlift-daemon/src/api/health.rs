//! Health check API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "bluetooth_available": true,
    "active_sessions": 0
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the Bluetooth adapter came up at startup.
    #[schema(example = true)]
    pub bluetooth_available: bool,

    /// Sessions currently running.
    #[schema(example = 0, minimum = 0)]
    pub active_sessions: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns the service version, whether the Bluetooth adapter is \
        available, and how many acquisition sessions are running.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bluetooth_available: state.bluetooth_available(),
        active_sessions: state.coordinator().active_count(),
    })
}
