//! Wiring configuration into the core components.

use std::sync::Arc;

use airlift_core::{
    AirliftConfig, CharacteristicWriteStrategy, CommandRunner, CredentialInbox, CredentialStore,
    ExtractionStrategy, FallbackCoordinator, HotspotCaptureStrategy, LinkInspector,
    NegotiationEngine, NetworkConnector, P2pControl, RadioLock, RadioOnlyStrategy, Strategy,
    SupplicantRadio, SystemLinkInspector, WpaCli,
};
use anyhow::Context;
use tracing::info;

/// The assembled core.
pub struct Runtime {
    /// Session coordinator.
    pub coordinator: FallbackCoordinator,
    /// Where GATT writes land, shared with the characteristic strategy.
    pub inbox: CredentialInbox,
}

impl Runtime {
    /// Build every component from `config`, running tools through `runner`.
    ///
    /// # Errors
    ///
    /// Returns an error if no credential location can be determined.
    pub fn new(config: &AirliftConfig, runner: Arc<dyn CommandRunner>) -> anyhow::Result<Self> {
        let timeout = config.tools.command_timeout();
        let lock = RadioLock::new();
        let inbox = CredentialInbox::new();

        let store = match &config.storage.credential_path {
            Some(path) => CredentialStore::new(path),
            None => CredentialStore::default_location()
                .context("no location for the credential record")?,
        };

        let radio = SupplicantRadio::new(
            Arc::clone(&runner),
            config.connector.interface.clone(),
            config.connector.supplicant_config.clone(),
            config.connector.ctrl_interface.clone(),
            timeout,
        );
        let connector = NetworkConnector::new(Arc::new(radio), lock.clone(), &config.connector);

        let strategies = build_strategies(config, &runner, &lock, &inbox);
        info!(
            strategies = ?config.session.strategies,
            store = %store.path().display(),
            "Core assembled"
        );

        Ok(Self {
            coordinator: FallbackCoordinator::new(
                strategies,
                store,
                connector,
                config.session.global_deadline(),
            ),
            inbox,
        })
    }
}

/// Instantiate the configured strategies in their configured order.
#[must_use]
pub fn build_strategies(
    config: &AirliftConfig,
    runner: &Arc<dyn CommandRunner>,
    lock: &RadioLock,
    inbox: &CredentialInbox,
) -> Vec<Arc<dyn Strategy>> {
    let timeout = config.tools.command_timeout();
    let inspector: Arc<dyn LinkInspector> =
        Arc::new(SystemLinkInspector::new(Arc::clone(runner), timeout));

    config
        .session
        .strategies
        .iter()
        .map(|kind| -> Arc<dyn Strategy> {
            match kind {
                ExtractionStrategy::P2pNegotiation => {
                    let control: Arc<dyn P2pControl> = Arc::new(WpaCli::new(
                        Arc::clone(runner),
                        config.p2p.interface.clone(),
                        timeout,
                    ));
                    Arc::new(NegotiationEngine::new(control, lock.clone(), &config.p2p))
                }
                ExtractionStrategy::CharacteristicWrite => Arc::new(
                    CharacteristicWriteStrategy::new(inbox.clone(), &config.gatt),
                ),
                ExtractionStrategy::HotspotCapture => Arc::new(HotspotCaptureStrategy::new(
                    Arc::clone(&inspector),
                    &config.hotspot,
                )),
                ExtractionStrategy::RadioOnlyHeuristic => Arc::new(RadioOnlyStrategy::new(
                    Arc::clone(&inspector),
                    &config.radio_only,
                )),
            }
        })
        .collect()
}

/// Live Bluetooth resources. Dropping them withdraws the GATT service.
#[cfg(feature = "bluetooth")]
pub struct Bluetooth {
    _service: airlift_core::bluez::CredentialService,
}

/// Open the adapter, publish the credential service and start feeding
/// device notifications into `notifications`.
///
/// # Errors
///
/// Returns an error if the adapter is missing or BlueZ rejects the service.
#[cfg(feature = "bluetooth")]
pub async fn start_bluetooth(
    config: &AirliftConfig,
    inbox: CredentialInbox,
    notifications: tokio::sync::mpsc::Sender<airlift_core::RadioNotification>,
    shutdown: tokio_util::sync::CancellationToken,
) -> airlift_core::Result<Bluetooth> {
    use airlift_core::bluez::{open_adapter, CredentialService, NotificationSource};

    let adapter = open_adapter(config.bluetooth.adapter.as_deref()).await?;
    let service = CredentialService::start(&adapter, &config.gatt.local_name, inbox).await?;

    tokio::spawn(async move {
        if let Err(e) = NotificationSource::new(adapter).run(notifications, shutdown).await {
            tracing::error!(error = %e, "Bluetooth notification source failed");
        }
    });

    Ok(Bluetooth { _service: service })
}
