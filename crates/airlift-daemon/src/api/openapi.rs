//! OpenAPI specification for the airlift API.

use axum::Json;
use utoipa::OpenApi;

use airlift_core::{ConnectionResult, ExtractionStrategy, PeerDevice, SessionReport, SessionState};

use super::credential::CredentialResponse;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::sessions::{SessionListResponse, StartSessionRequest};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Main OpenAPI document structure for airlift.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "airlift API",
        version = "0.1.0",
        description = r#"
# airlift API

airlift runs on a headless Raspberry Pi and gets it onto WiFi without a keyboard or
screen: pair a phone over Bluetooth and the device asks it for the network credentials.

## Sessions

Every phone that connects starts one acquisition session. A session tries, in order:

1. **WiFi Direct negotiation** with the phone
2. **Characteristic writes** - the phone writes the network name and passphrase to the GATT service
3. **Hotspot capture** - watches for the phone joining the local hotspot
4. **Radio-only heuristic** - reads what the Bluetooth stack knows about the phone

The first valid credential is stored and applied. A session ends as `succeeded`,
`exhausted`, `timed_out`, `cancelled` or `failed`.

## Secrets

The stored passphrase is never returned by this API.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local airlift daemon")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "sessions", description = "Credential acquisition sessions"),
        (name = "credential", description = "The persisted network credential")
    ),
    paths(
        super::health::health_check,
        super::sessions::list_sessions,
        super::sessions::start_session,
        super::sessions::get_session,
        super::sessions::cancel_session,
        super::credential::get_credential,
        super::credential::apply_credential,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StartSessionRequest,
            SessionListResponse,
            SessionReport,
            SessionState,
            PeerDevice,
            ExtractionStrategy,
            ConnectionResult,
            CredentialResponse,
        )
    )
)]
pub struct ApiDoc;
