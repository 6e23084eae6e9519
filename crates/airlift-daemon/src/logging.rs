//! Logging initialization and configuration.
//!
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Variable naming the fallback filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "AIRLIFT_LOG_LEVEL";

/// Variable selecting production output (`1` or `true`).
pub const PRODUCTION_ENV: &str = "AIRLIFT_PRODUCTION";

/// Keep the non-blocking writers alive for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether the environment asks for production logging.
///
/// Release builds default to production; `AIRLIFT_PRODUCTION` overrides.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(PRODUCTION_ENV).map_or(!cfg!(debug_assertions), |v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

/// Initialize the logging system.
///
/// # Production Mode
///
/// - Logs to rolling daily files in `/var/log/airlift/`
/// - Also logs to stdout for systemd journal capture
/// - JSON format in files, compact format without ANSI colors on stdout
///
/// # Development Mode
///
/// - Pretty stdout logs with span open/close events
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "airlift");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Compact, no ANSI, for journald
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Returns the log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/airlift")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "airlift")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
