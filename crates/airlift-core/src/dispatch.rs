//! The event loop tying radio notifications to sessions.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::FallbackCoordinator;
use crate::monitor::{DiscoveryMonitor, PeerEvent, RadioNotification};
use crate::strategy::CredentialInbox;

/// Consumes radio notifications and starts or cancels sessions.
pub struct Dispatcher {
    monitor: DiscoveryMonitor,
    coordinator: FallbackCoordinator,
    inbox: Option<CredentialInbox>,
}

impl Dispatcher {
    /// Create a dispatcher driving `coordinator`.
    #[must_use]
    pub fn new(coordinator: FallbackCoordinator) -> Self {
        Self {
            monitor: DiscoveryMonitor::new(),
            coordinator,
            inbox: None,
        }
    }

    /// Clear characteristic writes of peers that disconnect.
    #[must_use]
    pub fn with_inbox(mut self, inbox: CredentialInbox) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Run until the channel closes or `shutdown` fires.
    ///
    /// Running sessions are cancelled on the way out.
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<RadioNotification>,
        shutdown: CancellationToken,
    ) {
        info!("Dispatcher started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    break;
                }
                next = notifications.recv() => {
                    let Some(notification) = next else {
                        info!("Notification source closed");
                        break;
                    };
                    self.handle(&notification);
                }
            }
        }
        self.coordinator.shutdown();
    }

    /// Process a single notification.
    pub fn handle(&mut self, notification: &RadioNotification) {
        let Some(event) = self.monitor.handle(notification) else {
            return;
        };
        match event {
            PeerEvent::PeerConnected(peer) => {
                let handle = self.coordinator.start_session(peer);
                debug!(session_id = %handle.id(), peer = handle.address(), "Session dispatched");
            }
            PeerEvent::PeerDisconnected { address } => {
                self.coordinator.cancel(&address);
                if let Some(inbox) = &self.inbox {
                    inbox.clear(&address);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::config::ConnectorConfig;
    use crate::connector::NetworkConnector;
    use crate::control::{RadioLock, SupplicantRadio};
    use crate::session::SessionState;
    use crate::store::CredentialStore;
    use crate::strategy::Strategy;
    use crate::testing::{FakeStrategy, ScriptedRunner};
    use crate::types::ExtractionStrategy;

    const ADDR: &str = "AA:BB:CC:DD:EE:01";
    const PATH: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01";

    fn coordinator(dir: &tempfile::TempDir) -> (FallbackCoordinator, Arc<Mutex<Vec<ExtractionStrategy>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let radio = SupplicantRadio::new(
            Arc::new(ScriptedRunner::new()),
            "wlan0",
            dir.path().join("wpa_supplicant.conf"),
            "/var/run/wpa_supplicant",
            Duration::from_secs(5),
        );
        let strategy = FakeStrategy::new(ExtractionStrategy::P2pNegotiation, &[], &log)
            .with_cost(Duration::from_secs(30));
        let coordinator = FallbackCoordinator::new(
            vec![Arc::new(strategy) as Arc<dyn Strategy>],
            CredentialStore::new(dir.path().join("wifi_credentials.json")),
            NetworkConnector::new(Arc::new(radio), RadioLock::new(), &ConnectorConfig::default()),
            Duration::from_secs(90),
        );
        (coordinator, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_starts_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, log) = coordinator(&dir);
        let mut dispatcher = Dispatcher::new(coordinator.clone());

        let added = RadioNotification::device_added(PATH, ADDR, Some("Pixel"));
        dispatcher.handle(&added);
        dispatcher.handle(&added);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(coordinator.reports().len(), 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_and_clears_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(&dir);
        let inbox = CredentialInbox::new();
        let mut dispatcher = Dispatcher::new(coordinator.clone()).with_inbox(inbox.clone());

        dispatcher.handle(&RadioNotification::device_added(PATH, ADDR, None));
        inbox.record_network_name(ADDR, "HomeNet");
        dispatcher.handle(&RadioNotification::device_removed(PATH));

        assert_eq!(coordinator.status(ADDR), Some(SessionState::Cancelled));
        assert_eq!(inbox.network_name(ADDR), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_and_cancels_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(&dir);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Dispatcher::new(coordinator.clone()).run(rx, shutdown.clone()));

        tx.send(RadioNotification::device_added(PATH, ADDR, None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(coordinator.active_count(), 1);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(coordinator.status(ADDR), Some(SessionState::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ends_when_source_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(&dir);
        let (tx, rx) = mpsc::channel(8);
        drop(tx);

        Dispatcher::new(coordinator)
            .run(rx, CancellationToken::new())
            .await;
    }
}
