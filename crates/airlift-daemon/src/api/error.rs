//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use airlift_core::AirliftError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Operation cannot be completed due to current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 422 Unprocessable Entity - Stored data or tool output was unusable.
    Unprocessable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<serde_json::Value>,
    },

    /// 502/504 - An external tool failed or did not answer in time.
    Upstream {
        /// 502 or 504.
        status: StatusCode,
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - Bluetooth or the WiFi interface is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<serde_json::Value>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_bluetooth_address",
    "message": "'AA:BB' is not a Bluetooth address",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "session_not_found").
    #[schema(example = "session_not_found")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No session for AA:BB:CC:DD:EE:FF")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Status code this error is sent with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { status, .. } => *status,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match self {
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::NotFound {
                error_code,
                message,
            }
            | Self::Conflict {
                error_code,
                message,
            }
            | Self::Unprocessable {
                error_code,
                message,
            }
            | Self::Upstream {
                error_code,
                message,
                ..
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                ErrorResponse {
                    error: error_code,
                    message,
                    details,
                }
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::Unprocessable { message, .. } => write!(f, "Unprocessable: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::Upstream { message, .. } => write!(f, "Upstream Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from airlift_core errors.
impl From<AirliftError> for ApiError {
    fn from(err: AirliftError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match err.http_status_code() {
            404 => Self::NotFound {
                error_code,
                message,
            },
            422 => Self::Unprocessable {
                error_code,
                message,
            },
            502 => Self::Upstream {
                status: StatusCode::BAD_GATEWAY,
                error_code,
                message,
            },
            504 => Self::Upstream {
                status: StatusCode::GATEWAY_TIMEOUT,
                error_code,
                message,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<airlift_core::StoreError> for ApiError {
    fn from(err: airlift_core::StoreError) -> Self {
        Self::from(AirliftError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_core_errors_map_to_status() {
        let unavailable = ApiError::from(AirliftError::BluetoothAdapterNotFound);
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout = ApiError::from(AirliftError::ToolTimeout {
            program: "wpa_cli".into(),
            timeout_ms: 10_000,
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let persistence = ApiError::from(AirliftError::Persistence("disk full".into()));
        assert_eq!(persistence.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "session_not_found".to_string(),
            message: "No session".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("session_not_found"));
    }
}
