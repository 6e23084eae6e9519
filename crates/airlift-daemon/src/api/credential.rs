//! Persisted credential endpoints.
//!
//! The passphrase never leaves the device through the API.

use airlift_core::ConnectionResult;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the credential router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/credential", get(get_credential))
        .route("/api/credential/apply", post(apply_credential))
}

/// What is stored, without the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "configured": true,
    "network_name": "HomeNet",
    "path": "/etc/wifi_credentials.json"
}))]
pub struct CredentialResponse {
    /// Whether a credential has been persisted.
    #[schema(example = true)]
    pub configured: bool,

    /// Name of the stored network.
    #[schema(example = "HomeNet", nullable)]
    pub network_name: Option<String>,

    /// Location of the record.
    #[schema(example = "/etc/wifi_credentials.json")]
    pub path: String,
}

/// Get the stored network name.
#[utoipa::path(
    get,
    path = "/api/credential",
    tag = "credential",
    operation_id = "getCredential",
    summary = "Get the persisted network",
    description = "Returns the network name of the last acquired credential. \
        The passphrase is never returned.",
    responses(
        (status = 200, description = "Stored credential summary", body = CredentialResponse),
        (status = 500, description = "Record unreadable", body = super::error::ErrorResponse)
    )
)]
pub async fn get_credential(State(state): State<SharedState>) -> ApiResult<Json<CredentialResponse>> {
    let store = state.coordinator().store();
    let current = store.current()?;
    Ok(Json(CredentialResponse {
        configured: current.is_some(),
        network_name: current.map(|c| c.network_name),
        path: store.path().display().to_string(),
    }))
}

/// Apply the stored credential again.
#[utoipa::path(
    post,
    path = "/api/credential/apply",
    tag = "credential",
    operation_id = "applyCredential",
    summary = "Re-apply the persisted credential",
    description = "Writes the stored credential to the supplicant and waits for the \
        interface to associate.",
    responses(
        (status = 200, description = "Associated with the network", body = ConnectionResult),
        (status = 404, description = "No credential stored", body = super::error::ErrorResponse),
        (status = 503, description = "Association not verified", body = super::error::ErrorResponse)
    )
)]
pub async fn apply_credential(State(state): State<SharedState>) -> ApiResult<Json<ConnectionResult>> {
    let coordinator = state.coordinator();
    let Some(credential) = coordinator.store().current()? else {
        return Err(ApiError::NotFound {
            error_code: "credential_not_found".to_string(),
            message: "No credential has been acquired yet".to_string(),
        });
    };

    let result = coordinator
        .connector()
        .apply(&credential, &CancellationToken::new())
        .await;
    if result.success {
        return Ok(Json(result));
    }

    let err = airlift_core::AirliftError::ConnectionVerification {
        network: credential.network_name,
    };
    Err(ApiError::ServiceUnavailable {
        error_code: err.error_code().to_string(),
        message: err.to_string(),
        details: serde_json::to_value(&result).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_server;
    use airlift_core::{CredentialCandidate, ExtractionStrategy};
    use axum::http::StatusCode;

    fn seed(state: &SharedState) {
        let candidate = CredentialCandidate {
            network_name: "HomeNet".to_string(),
            passphrase: "s3cr3t".to_string(),
            provenance: ExtractionStrategy::CharacteristicWrite,
            raw_source: String::new(),
        };
        state.coordinator().store().persist(&candidate).unwrap();
    }

    #[tokio::test]
    async fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = test_server(&dir);

        let body: CredentialResponse = server.get("/api/credential").await.json();
        assert!(!body.configured);
        assert_eq!(body.network_name, None);

        server
            .post("/api/credential/apply")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn test_passphrase_is_never_returned() {
        let dir = tempfile::tempdir().unwrap();
        let (server, state) = test_server(&dir);
        seed(&state);

        let response = server.get("/api/credential").await;
        response.assert_status_ok();
        assert!(!response.text().contains("s3cr3t"));
        let body: CredentialResponse = response.json();
        assert_eq!(body.network_name.as_deref(), Some("HomeNet"));
    }

    #[tokio::test]
    async fn test_apply_failure_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (server, state) = test_server(&dir);
        seed(&state);

        let response = server.post("/api/credential/apply").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: super::super::error::ErrorResponse = response.json();
        assert_eq!(body.error, "CONNECTION_NOT_VERIFIED");
        assert_eq!(body.details.unwrap()["success"], false);
    }
}
