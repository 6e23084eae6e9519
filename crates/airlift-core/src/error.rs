//! Unified error types for the airlift core library.
//!
//! [`AirliftError`] covers every failure mode that can leave the core. Each
//! module also has its own specific error type ([`ToolError`](crate::tool::ToolError),
//! [`StoreError`](crate::store::StoreError), [`ConfigError`](crate::config::ConfigError),
//! [`ParseError`](crate::parser::ParseError)) for internal use; they convert into
//! [`AirliftError`] at module boundaries.
//!
//! Most of these errors never reach a caller. The coordinator absorbs tool,
//! timeout and parse failures into strategy outcomes; only persistence failures
//! and irrecoverable setup errors (no adapter) surface as session failures.
//!
//! # Example
//!
//! ```rust
//! use airlift_core::error::{AirliftError, Result};
//!
//! fn require_adapter(present: bool) -> Result<()> {
//!     if !present {
//!         return Err(AirliftError::BluetoothAdapterNotFound);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all airlift operations.
#[derive(Debug, Error)]
pub enum AirliftError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but could not be powered on.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// A BlueZ call failed.
    #[error("Bluetooth operation failed: {0}")]
    Bluetooth(String),

    // =========================================================================
    // EXTERNAL TOOL ERRORS
    // =========================================================================
    /// The external program could not be started at all.
    #[error("Failed to start '{program}': {message}")]
    ToolSpawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error text.
        message: String,
    },

    /// The external program ran and exited non-zero.
    #[error("'{program}' exited with status {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ToolInvocation {
        /// Program that failed.
        program: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// A command or polling loop exceeded its bound.
    #[error("'{program}' did not finish within {timeout_ms} ms")]
    ToolTimeout {
        /// Program or loop that timed out.
        program: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    // =========================================================================
    // ACQUISITION ERRORS
    // =========================================================================
    /// Tool output did not have the expected shape.
    #[error("Unexpected tool output: {0}")]
    Parse(String),

    /// The credential could not be written to durable storage.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The radio interface never reported association with the network.
    #[error("Could not verify association with network '{network}'")]
    ConnectionVerification {
        /// Network name that was applied.
        network: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for airlift operations.
pub type Result<T> = std::result::Result<T, AirliftError>;

/// Short alias, mirrors the naming used across the crate.
pub type Error = AirliftError;

impl AirliftError {
    /// Returns `true` if this error came from BlueZ or the adapter.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound | Self::BluetoothAdapterPoweredOff | Self::Bluetooth(_)
        )
    }

    /// Returns `true` if this error came from invoking an external program.
    #[inline]
    #[must_use]
    pub const fn is_tool_error(&self) -> bool {
        matches!(
            self,
            Self::ToolSpawn { .. } | Self::ToolInvocation { .. } | Self::ToolTimeout { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::IoError(_))
    }

    /// Returns `true` if the acquisition can continue with another sub-attempt
    /// or strategy after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ToolInvocation { .. }
                | Self::ToolTimeout { .. }
                | Self::ToolSpawn { .. }
                | Self::Parse(_)
                | Self::ConnectionVerification { .. }
        )
    }

    /// Returns `true` if this error must end the session as a failure.
    #[inline]
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::BluetoothAdapterNotFound | Self::BluetoothAdapterPoweredOff
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ConfigNotFound(_) => 404,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) | Self::Parse(_) => 422,
            Self::Persistence(_) | Self::IoError(_) => 500,
            Self::ToolSpawn { .. } | Self::ToolInvocation { .. } => 502,
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::Bluetooth(_)
            | Self::ConnectionVerification { .. } => 503,
            Self::ToolTimeout { .. } => 504,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::Bluetooth(_) => "BLUETOOTH_ERROR",
            Self::ToolSpawn { .. } => "TOOL_SPAWN_FAILED",
            Self::ToolInvocation { .. } => "TOOL_INVOCATION_FAILED",
            Self::ToolTimeout { .. } => "TOOL_TIMEOUT",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::ConnectionVerification { .. } => "CONNECTION_NOT_VERIFIED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::tool::ToolError> for AirliftError {
    fn from(err: crate::tool::ToolError) -> Self {
        use crate::tool::ToolError;
        match err {
            ToolError::Spawn { program, source } => Self::ToolSpawn {
                program,
                message: source.to_string(),
            },
            ToolError::NonZeroExit {
                program,
                code,
                stderr,
            } => Self::ToolInvocation {
                program,
                code,
                stderr,
            },
            ToolError::Rejected { program, reply } => Self::ToolInvocation {
                program,
                code: None,
                stderr: reply,
            },
            ToolError::Timeout { program, timeout } => Self::ToolTimeout {
                program,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for AirliftError {
    fn from(err: bluer::Error) -> Self {
        Self::Bluetooth(err.to_string())
    }
}

impl From<crate::store::StoreError> for AirliftError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<crate::parser::ParseError> for AirliftError {
    fn from(err: crate::parser::ParseError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<crate::config::ConfigError> for AirliftError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::Persistence(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};
    use std::time::Duration;

    use crate::tool::ToolError;

    #[test]
    fn test_tool_error_classification() {
        let err = AirliftError::ToolInvocation {
            program: "wpa_cli".into(),
            code: Some(255),
            stderr: "FAIL".into(),
        };
        assert!(err.is_tool_error());
        assert!(err.is_recoverable());
        assert!(!err.is_session_fatal());

        assert!(!AirliftError::BluetoothAdapterNotFound.is_tool_error());
    }

    #[test]
    fn test_session_fatal_errors() {
        assert!(AirliftError::Persistence("disk full".into()).is_session_fatal());
        assert!(AirliftError::BluetoothAdapterNotFound.is_session_fatal());
        assert!(!AirliftError::Parse("no ssid".into()).is_session_fatal());
        assert!(!AirliftError::ConnectionVerification {
            network: "HomeNet".into()
        }
        .is_session_fatal());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(AirliftError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(AirliftError::ConfigParseError("syntax".into()).is_config_error());
        assert!(!AirliftError::Bluetooth("dbus".into()).is_config_error());
    }

    #[test]
    fn test_from_tool_error_timeout() {
        let err: AirliftError = ToolError::Timeout {
            program: "wpa_cli".into(),
            timeout: Duration::from_secs(10),
        }
        .into();
        match err {
            AirliftError::ToolTimeout {
                ref program,
                timeout_ms,
            } => {
                assert_eq!(program, "wpa_cli");
                assert_eq!(timeout_ms, 10_000);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.error_code(), "TOOL_TIMEOUT");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: AirliftError = io_err.into();
        assert!(matches!(err, AirliftError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(AirliftError::BluetoothAdapterNotFound.http_status_code(), 503);
        assert_eq!(AirliftError::Persistence("x".into()).http_status_code(), 500);
        assert_eq!(AirliftError::Parse("x".into()).http_status_code(), 422);
        assert_eq!(
            AirliftError::ToolTimeout {
                program: "iwconfig".into(),
                timeout_ms: 1
            }
            .http_status_code(),
            504
        );
    }

    #[test]
    fn test_invocation_display_without_code() {
        let err = AirliftError::ToolInvocation {
            program: "wpa_cli".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AirliftError>();
        assert_sync::<AirliftError>();
    }
}
