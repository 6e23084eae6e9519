//! Typed facades over the radio control-plane tools.
//!
//! The acquisition logic only sees the [`P2pControl`], [`RadioInterface`] and
//! [`LinkInspector`] traits. The implementations here drive `wpa_cli`,
//! `iwconfig`, `bluetoothctl` and `arp` through a [`CommandRunner`].
//!
//! Query methods return the tool's raw text; interpretation belongs to
//! [`crate::parser`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::tool::{CommandRunner, ToolError};

/// Connection method passed to `p2p_connect`: push-button configuration.
pub const PUSH_BUTTON: &str = "pbc";

const WPA_CLI: &str = "wpa_cli";

/// Exclusive access to the physical radio.
///
/// Held for the whole of any phase that reconfigures the interface: peer
/// discovery and its settle time, a connection and its status polling,
/// group formation and its wait, applying a network and verifying
/// association. Queries outside those phases do not take it.
#[derive(Debug, Clone, Default)]
pub struct RadioLock(Arc<Mutex<()>>);

impl RadioLock {
    /// Create an unlocked radio.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.0).lock_owned().await
    }

    /// Wait for exclusive access unless `cancel` fires first.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> Option<OwnedMutexGuard<()>> {
        tokio::select! {
            () = cancel.cancelled() => None,
            guard = self.acquire() => Some(guard),
        }
    }
}

/// WiFi Direct control operations.
#[async_trait]
pub trait P2pControl: Send + Sync {
    /// Start peer discovery. `timeout` bounds the command.
    async fn discover_peers(&self, timeout: Duration) -> Result<()>;

    /// Raw peer-list text.
    async fn list_peers(&self) -> Result<String>;

    /// Request a connection to `address` using `method`.
    async fn connect_peer(&self, address: &str, method: &str) -> Result<()>;

    /// Raw status text.
    async fn query_status(&self) -> Result<String>;

    /// Raw details for one peer.
    async fn query_peer_info(&self, address: &str) -> Result<String>;

    /// Send a service-discovery request.
    async fn service_discovery_request(&self, address: &str, query: &str) -> Result<()>;

    /// Raw service-discovery response text.
    async fn service_discovery_response(&self) -> Result<String>;

    /// Ask to form a group.
    async fn group_add(&self) -> Result<()>;

    /// Raw group info text.
    async fn group_info(&self) -> Result<String>;

    /// Stop an ongoing discovery.
    async fn stop_find(&self) -> Result<()>;
}

/// Station interface operations.
#[async_trait]
pub trait RadioInterface: Send + Sync {
    /// Write a client configuration for the network and ask the interface
    /// to associate.
    async fn apply_network_config(&self, network_name: &str, passphrase: &str) -> Result<()>;

    /// Raw interface state text.
    async fn query_interface_state(&self) -> Result<String>;
}

/// Read-only queries of the peer link and local network.
#[async_trait]
pub trait LinkInspector: Send + Sync {
    /// What the Bluetooth stack knows about `address`.
    async fn peer_info(&self, address: &str) -> Result<String>;

    /// The kernel neighbour table.
    async fn neighbors(&self) -> Result<String>;
}

/// [`P2pControl`] over `wpa_cli`.
#[derive(Clone)]
pub struct WpaCli {
    runner: Arc<dyn CommandRunner>,
    interface: String,
    timeout: Duration,
}

impl WpaCli {
    /// Drive `interface`, bounding each command by `timeout`.
    pub fn new(runner: Arc<dyn CommandRunner>, interface: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            interface: interface.into(),
            timeout,
        }
    }

    async fn query(&self, args: &[&str], limit: Duration) -> Result<String> {
        let mut full = vec!["-i", self.interface.as_str()];
        full.extend_from_slice(args);
        Ok(self.runner.run(WPA_CLI, &full, limit).await?)
    }

    /// Run a command whose reply is `OK` (or an identifier) on success.
    async fn request(&self, args: &[&str], limit: Duration) -> Result<()> {
        let reply = self.query(args, limit).await?;
        let reply = reply.trim();
        if reply.starts_with("FAIL") || reply.starts_with("UNKNOWN COMMAND") {
            return Err(ToolError::Rejected {
                program: format!("{WPA_CLI} {}", args.first().copied().unwrap_or_default()),
                reply: reply.to_string(),
            }
            .into());
        }
        debug!(command = args.first().copied().unwrap_or_default(), reply, "wpa_cli accepted");
        Ok(())
    }
}

#[async_trait]
impl P2pControl for WpaCli {
    async fn discover_peers(&self, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().max(1).to_string();
        self.request(&["p2p_find", &secs], timeout).await
    }

    async fn list_peers(&self) -> Result<String> {
        self.query(&["p2p_peers"], self.timeout).await
    }

    async fn connect_peer(&self, address: &str, method: &str) -> Result<()> {
        self.request(&["p2p_connect", address, method], self.timeout).await
    }

    async fn query_status(&self) -> Result<String> {
        self.query(&["status"], self.timeout).await
    }

    async fn query_peer_info(&self, address: &str) -> Result<String> {
        self.query(&["p2p_peer", address], self.timeout).await
    }

    async fn service_discovery_request(&self, address: &str, query: &str) -> Result<()> {
        self.request(&["p2p_serv_disc_req", address, query], self.timeout)
            .await
    }

    async fn service_discovery_response(&self) -> Result<String> {
        self.query(&["p2p_serv_disc_resp"], self.timeout).await
    }

    async fn group_add(&self) -> Result<()> {
        self.request(&["p2p_group_add"], self.timeout).await
    }

    async fn group_info(&self) -> Result<String> {
        self.query(&["p2p_group_info"], self.timeout).await
    }

    async fn stop_find(&self) -> Result<()> {
        self.request(&["p2p_stop_find"], self.timeout).await
    }
}

/// Render a `wpa_supplicant` configuration holding one network block.
#[must_use]
pub fn render_client_config(ctrl_interface: &str, network_name: &str, passphrase: &str) -> String {
    format!(
        "ctrl_interface={ctrl_interface}\n\
         ctrl_interface_group=0\n\
         update_config=1\n\
         \n\
         network={{\n\
         \tssid=\"{network_name}\"\n\
         \tpsk=\"{passphrase}\"\n\
         \tkey_mgmt=WPA-PSK\n\
         \tscan_ssid=1\n\
         }}\n"
    )
}

/// [`RadioInterface`] that writes the supplicant config and reloads it.
#[derive(Clone)]
pub struct SupplicantRadio {
    runner: Arc<dyn CommandRunner>,
    interface: String,
    config_path: PathBuf,
    ctrl_interface: String,
    timeout: Duration,
}

impl SupplicantRadio {
    /// Manage `interface`, writing its config to `config_path`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        interface: impl Into<String>,
        config_path: impl Into<PathBuf>,
        ctrl_interface: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            interface: interface.into(),
            config_path: config_path.into(),
            ctrl_interface: ctrl_interface.into(),
            timeout,
        }
    }

    async fn write_config(&self, content: &str) -> Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.config_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl RadioInterface for SupplicantRadio {
    async fn apply_network_config(&self, network_name: &str, passphrase: &str) -> Result<()> {
        let content = render_client_config(&self.ctrl_interface, network_name, passphrase);
        self.write_config(&content).await?;
        info!(
            network = network_name,
            path = %self.config_path.display(),
            "Wrote supplicant configuration"
        );

        let reply = self
            .runner
            .run(WPA_CLI, &["-i", &self.interface, "reconfigure"], self.timeout)
            .await?;
        if reply.trim().starts_with("FAIL") {
            return Err(ToolError::Rejected {
                program: format!("{WPA_CLI} reconfigure"),
                reply: reply.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn query_interface_state(&self) -> Result<String> {
        Ok(self
            .runner
            .run("iwconfig", &[&self.interface], self.timeout)
            .await?)
    }
}

/// [`LinkInspector`] over `bluetoothctl` and `arp`.
#[derive(Clone)]
pub struct SystemLinkInspector {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SystemLinkInspector {
    /// Create an inspector bounding each command by `timeout`.
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl LinkInspector for SystemLinkInspector {
    async fn peer_info(&self, address: &str) -> Result<String> {
        Ok(self
            .runner
            .run("bluetoothctl", &["info", address], self.timeout)
            .await?)
    }

    async fn neighbors(&self) -> Result<String> {
        Ok(self.runner.run("arp", &["-n"], self.timeout).await?)
    }
}
