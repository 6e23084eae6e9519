//! Session API endpoints.
//!
//! Sessions normally start when a phone connects over Bluetooth. These
//! endpoints expose their progress and allow starting one by hand, e.g. for a
//! phone that was already connected when the daemon came up.

use airlift_core::{is_valid_mac_address, PeerDevice, SessionReport};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the sessions router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(start_session))
        .route(
            "/api/sessions/{address}",
            get(get_session).delete(cancel_session),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to start a session by hand.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF",
    "name": "Pixel 8"
}))]
pub struct StartSessionRequest {
    /// Bluetooth address of the phone.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,

    /// Display name. Defaults to "Unknown Device".
    #[schema(example = "Pixel 8")]
    #[serde(default)]
    pub name: Option<String>,
}

/// All known sessions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    /// Latest session per address, oldest first.
    pub sessions: Vec<SessionReport>,

    /// How many of them are still running.
    #[schema(example = 1, minimum = 0)]
    pub active: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List sessions.
#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "sessions",
    operation_id = "listSessions",
    summary = "List acquisition sessions",
    description = "Returns the latest session for every phone seen since startup, \
        including finished ones.",
    responses(
        (status = 200, description = "Known sessions", body = SessionListResponse)
    )
)]
pub async fn list_sessions(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let coordinator = state.coordinator();
    Json(SessionListResponse {
        sessions: coordinator.reports(),
        active: coordinator.active_count(),
    })
}

/// Start a session.
#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    operation_id = "startSession",
    summary = "Start an acquisition session",
    description = "Starts asking the given phone for WiFi credentials. If a session \
        for the address is already running, that session is returned instead.",
    request_body = StartSessionRequest,
    responses(
        (status = 202, description = "Session running", body = SessionReport),
        (status = 400, description = "Invalid Bluetooth address", body = super::error::ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionReport>)> {
    if !is_valid_mac_address(&request.address) {
        return Err(ApiError::BadRequest {
            error_code: "invalid_bluetooth_address".to_string(),
            message: format!("'{}' is not a Bluetooth address", request.address),
        });
    }

    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| airlift_core::monitor::UNKNOWN_DEVICE_NAME.to_string());
    let handle = state
        .coordinator()
        .start_session(PeerDevice::new(&request.address, name));
    tracing::info!(session_id = %handle.id(), peer = handle.address(), "Session started via API");

    Ok((StatusCode::ACCEPTED, Json(handle.report())))
}

/// Get one session.
#[utoipa::path(
    get,
    path = "/api/sessions/{address}",
    tag = "sessions",
    operation_id = "getSession",
    summary = "Get a session",
    params(("address" = String, Path, description = "Bluetooth address of the phone")),
    responses(
        (status = 200, description = "Latest session for the address", body = SessionReport),
        (status = 404, description = "No session for the address", body = super::error::ErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<SessionReport>> {
    state
        .coordinator()
        .report(&address)
        .map(Json)
        .ok_or_else(|| not_found(&address))
}

/// Cancel a session.
#[utoipa::path(
    delete,
    path = "/api/sessions/{address}",
    tag = "sessions",
    operation_id = "cancelSession",
    summary = "Cancel a running session",
    description = "Stops the session for the address. The session ends as `cancelled` \
        and nothing is persisted.",
    params(("address" = String, Path, description = "Bluetooth address of the phone")),
    responses(
        (status = 200, description = "Session cancelled", body = SessionReport),
        (status = 404, description = "No session for the address", body = super::error::ErrorResponse),
        (status = 409, description = "Session already finished", body = super::error::ErrorResponse)
    )
)]
pub async fn cancel_session(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<SessionReport>> {
    let coordinator = state.coordinator();
    let Some(report) = coordinator.report(&address) else {
        return Err(not_found(&address));
    };
    if !coordinator.cancel(&address) {
        return Err(ApiError::Conflict {
            error_code: "session_not_active".to_string(),
            message: format!("Session for {} already ended as {}", report.peer.address, report.state),
        });
    }
    coordinator
        .report(&address)
        .map(Json)
        .ok_or_else(|| not_found(&address))
}

fn not_found(address: &str) -> ApiError {
    ApiError::NotFound {
        error_code: "session_not_found".to_string(),
        message: format!("No session for {address}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_server;
    use airlift_core::SessionState;
    use serde_json::json;

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    #[test]
    fn test_start_request_name_is_optional() {
        let request: StartSessionRequest =
            serde_json::from_str(r#"{"address": "AA:BB:CC:DD:EE:FF"}"#).unwrap();
        assert_eq!(request.name, None);
    }

    #[tokio::test]
    async fn test_start_then_get_session() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = test_server(&dir);

        let response = server
            .post("/api/sessions")
            .json(&json!({"address": "aa:bb:cc:dd:ee:01", "name": "Pixel"}))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let started: SessionReport = response.json();
        assert_eq!(started.peer.address, ADDR);
        assert_eq!(started.peer.name, "Pixel");

        let fetched: SessionReport = server.get(&format!("/api/sessions/{ADDR}")).await.json();
        assert_eq!(fetched.id, started.id);

        let list: SessionListResponse = server.get("/api/sessions").await.json();
        assert_eq!(list.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_address() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = test_server(&dir);

        let response = server
            .post("/api/sessions")
            .json(&json!({"address": "not-an-address"}))
            .await;
        response.assert_status_bad_request();
        let body: super::super::error::ErrorResponse = response.json();
        assert_eq!(body.error, "invalid_bluetooth_address");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = test_server(&dir);

        server
            .get(&format!("/api/sessions/{ADDR}"))
            .await
            .assert_status_not_found();
        server
            .delete(&format!("/api/sessions/{ADDR}"))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_cancel_then_cancel_again() {
        let dir = tempfile::tempdir().unwrap();
        let (server, state) = test_server(&dir);
        state
            .coordinator()
            .start_session(PeerDevice::new(ADDR, "Pixel"));

        let response = server.delete(&format!("/api/sessions/{ADDR}")).await;
        response.assert_status_ok();
        let report: SessionReport = response.json();
        assert_eq!(report.state, SessionState::Cancelled);

        server
            .delete(&format!("/api/sessions/{ADDR}"))
            .await
            .assert_status(StatusCode::CONFLICT);
    }
}
