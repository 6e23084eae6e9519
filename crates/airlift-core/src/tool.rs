//! Bounded invocation of external command-line tools.
//!
//! Every external program the core talks to (`wpa_cli`, `bluetoothctl`,
//! `iwconfig`, `arp`) goes through a [`CommandRunner`]. Each call carries its
//! own timeout; a call that overruns is killed and reported as
//! [`ToolError::Timeout`]. Non-zero exits are reported as
//! [`ToolError::NonZeroExit`] so callers can treat both as a failed
//! sub-attempt.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The program exited with a non-zero status.
    #[error("{program} exited with {code:?}: {stderr}")]
    NonZeroExit {
        /// Program name.
        program: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The program exited cleanly but its reply reports failure
    /// (`wpa_cli` prints `FAIL` and exits zero).
    #[error("{program} rejected the request: {reply}")]
    Rejected {
        /// Program name.
        program: String,
        /// The reply text.
        reply: String,
    },

    /// The program did not finish within its bound.
    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        /// Program name.
        program: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },
}

/// Result type for tool invocations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Runs an external program and captures its standard output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `limit`.
    ///
    /// Returns captured stdout on a zero exit status.
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> ToolResult<String>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    use_sudo: bool,
}

impl SystemCommandRunner {
    /// Create a runner. With `use_sudo` every command is prefixed with `sudo`.
    #[must_use]
    pub const fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> ToolResult<String> {
        debug!(program, ?args, timeout_ms = limit.as_millis(), "Running external tool");

        let child = self
            .command(program, args)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop).
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout: limit,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(program, stdout = %stdout, "Tool output");

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(ToolError::NonZeroExit {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemCommandRunner::new(false);
        let out = runner
            .run("echo", &["ssid=HomeNet"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "ssid=HomeNet");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let runner = SystemCommandRunner::new(false);
        let err = runner
            .run("false", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NonZeroExit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = SystemCommandRunner::new(false);
        let err = runner
            .run("airlift-no-such-tool", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_overrun_is_timeout() {
        let runner = SystemCommandRunner::new(false);
        let err = runner
            .run("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
