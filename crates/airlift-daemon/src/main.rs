//! # airlift
//!
//! Gets a headless Raspberry Pi onto WiFi by asking a paired phone for the
//! network credentials.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package airlift-daemon
//!
//! # Production (on Raspberry Pi, as root or with tools.use_sudo)
//! AIRLIFT_CONFIG=/etc/airlift/config.toml ./airlift
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use airlift_core::{AirliftConfig, Dispatcher, SystemCommandRunner};
use airlift_daemon::api::create_router;
use airlift_daemon::logging;
use airlift_daemon::runtime::Runtime;
use airlift_daemon::state::AppState;
use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Notifications buffered between the radio and the dispatcher.
const NOTIFICATION_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    let config = AirliftConfig::load().context("failed to load configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        deadline_secs = config.session.global_deadline_secs,
        "Starting airlift"
    );

    let runner = Arc::new(SystemCommandRunner::new(config.tools.use_sudo));
    let runtime = Runtime::new(&config, runner)?;
    let shutdown = CancellationToken::new();
    let (notifications, rx) = mpsc::channel(NOTIFICATION_BUFFER);

    #[cfg(feature = "bluetooth")]
    let bluetooth = match airlift_daemon::runtime::start_bluetooth(
        &config,
        runtime.inbox.clone(),
        notifications.clone(),
        shutdown.clone(),
    )
    .await
    {
        Ok(bluetooth) => Some(bluetooth),
        Err(e) => {
            error!(error = %e, "Bluetooth unavailable, sessions can only be started via the API");
            None
        }
    };
    #[cfg(feature = "bluetooth")]
    let bluetooth_available = bluetooth.is_some();
    #[cfg(not(feature = "bluetooth"))]
    let bluetooth_available = {
        warn!("Built without Bluetooth support, sessions can only be started via the API");
        false
    };

    let dispatcher = Dispatcher::new(runtime.coordinator.clone()).with_inbox(runtime.inbox.clone());
    let dispatch = tokio::spawn(dispatcher.run(rx, shutdown.clone()));

    spawn_signal_handler(shutdown.clone());

    if config.server.enabled {
        let state = AppState::new(config.clone(), runtime.coordinator.clone(), bluetooth_available);
        let addr = config.server.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("Listening on {}", addr);

        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;
    } else {
        info!("HTTP API disabled");
        shutdown.cancelled().await;
    }

    drop(notifications);
    if let Err(e) = dispatch.await {
        warn!(error = %e, "Dispatcher task ended abnormally");
    }
    #[cfg(feature = "bluetooth")]
    drop(bluetooth);

    info!("airlift stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "Cannot install signal handlers");
                        return;
                    }
                };

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Cannot listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C, initiating shutdown...");
        }

        shutdown.cancel();
    });
}
