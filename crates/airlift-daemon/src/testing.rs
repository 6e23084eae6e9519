//! Helpers for the daemon tests.

use std::sync::Arc;
use std::time::Duration;

use airlift_core::tool::{CommandRunner, ToolError, ToolResult};
use airlift_core::AirliftConfig;
use async_trait::async_trait;
use axum_test::TestServer;

use crate::api::create_router;
use crate::runtime::Runtime;
use crate::state::AppState;

/// Runner for which every program exits non-zero.
pub struct RefusingRunner;

#[async_trait]
impl CommandRunner for RefusingRunner {
    async fn run(&self, program: &str, _args: &[&str], _limit: Duration) -> ToolResult<String> {
        Err(ToolError::NonZeroExit {
            program: program.to_string(),
            code: Some(1),
            stderr: "not available in tests".to_string(),
        })
    }
}

/// Defaults with every file path inside `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> AirliftConfig {
    let mut config = AirliftConfig::default();
    config.storage.credential_path = Some(dir.path().join("wifi_credentials.json"));
    config.connector.supplicant_config = dir.path().join("wpa_supplicant.conf");
    config.connector.verify_attempts = 1;
    config
}

/// An API server over a core whose tools always fail.
pub fn test_server(dir: &tempfile::TempDir) -> (TestServer, AppState) {
    let config = test_config(dir);
    let runtime = Runtime::new(&config, Arc::new(RefusingRunner)).unwrap();
    let state = AppState::new(config, runtime.coordinator, false);
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, state)
}
