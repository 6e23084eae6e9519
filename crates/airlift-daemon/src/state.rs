//! Application state shared across handlers.

use std::sync::Arc;

use airlift_core::{AirliftConfig, FallbackCoordinator};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

/// Handlers take the state by this name.
pub type SharedState = AppState;

struct AppStateInner {
    config: AirliftConfig,
    coordinator: FallbackCoordinator,
    bluetooth_available: bool,
}

impl AppState {
    /// Create application state around a running coordinator.
    #[must_use]
    pub fn new(
        config: AirliftConfig,
        coordinator: FallbackCoordinator,
        bluetooth_available: bool,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
                bluetooth_available,
            }),
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AirliftConfig {
        &self.inner.config
    }

    /// The session coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &FallbackCoordinator {
        &self.inner.coordinator
    }

    /// Whether the Bluetooth adapter came up at startup.
    #[must_use]
    pub fn bluetooth_available(&self) -> bool {
        self.inner.bluetooth_available
    }
}
