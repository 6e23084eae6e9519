//! Acquisition strategies.
//!
//! Every way of obtaining a credential implements [`Strategy`]. The
//! coordinator runs them in priority order and only looks at the
//! [`StrategyOutcome`]; errors from the tools underneath are folded into
//! `NoCredential` or `StrategyError` here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{GattConfig, HotspotConfig, RadioOnlyConfig};
use crate::control::LinkInspector;
use crate::parser::{extract_candidate, parse_neighbors, NETWORK_NAME_KEY, PASSPHRASE_KEY};
use crate::poll::{poll_until, PollOutcome};
use crate::session::Session;
use crate::types::{normalize_address, CredentialCandidate, ExtractionStrategy};

/// When a strategy may start and how often it may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPolicy {
    /// Remaining session time required to start an attempt.
    pub min_budget: Duration,
    /// Attempts allowed when the strategy reports an error.
    pub max_attempts: u32,
}

impl StrategyPolicy {
    /// Create a policy. `max_attempts` below one is treated as one.
    #[must_use]
    pub const fn new(min_budget: Duration, max_attempts: u32) -> Self {
        Self {
            min_budget,
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
        }
    }
}

/// What one strategy attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// A candidate credential. The coordinator still validates it.
    CredentialFound(CredentialCandidate),
    /// The strategy ran and found nothing. Move on.
    NoCredential,
    /// The strategy could not run properly. May be retried.
    StrategyError(String),
}

/// One way of obtaining a credential from a peer.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> ExtractionStrategy;

    /// Scheduling policy.
    fn policy(&self) -> StrategyPolicy;

    /// Run one attempt against `session`'s peer.
    ///
    /// Implementations observe `session.cancel_token()` in every wait.
    async fn attempt(&self, session: &Session) -> StrategyOutcome;
}

/// Polls that fit in `window` at `interval`, at least one.
fn attempts_within(window: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let n = window.as_millis() / interval.as_millis().max(1);
    u32::try_from(n).unwrap_or(u32::MAX).max(1)
}

#[derive(Debug, Default, Clone)]
struct PartialCredential {
    network_name: Option<String>,
    passphrase: Option<String>,
}

/// Values written by peers to the credential characteristics, keyed by
/// peer address.
///
/// The GATT service writes into it; [`CharacteristicWriteStrategy`] takes
/// from it once both halves are present.
#[derive(Debug, Clone, Default)]
pub struct CredentialInbox {
    entries: Arc<Mutex<HashMap<String, PartialCredential>>>,
}

impl CredentialInbox {
    /// Create an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a network name written by `address`.
    pub fn record_network_name(&self, address: &str, value: &str) {
        self.record(address, value, |entry, v| entry.network_name = Some(v));
    }

    /// Record a passphrase written by `address`.
    pub fn record_passphrase(&self, address: &str, value: &str) {
        self.record(address, value, |entry, v| entry.passphrase = Some(v));
    }

    fn record(&self, address: &str, value: &str, set: impl FnOnce(&mut PartialCredential, String)) {
        let value = value.trim_end_matches('\0').trim();
        if value.contains(['\n', '\r']) {
            warn!(peer = address, "Ignoring multi-line characteristic write");
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        set(
            entries.entry(normalize_address(address)).or_default(),
            value.to_string(),
        );
    }

    /// The last network name written by `address`, if any.
    #[must_use]
    pub fn network_name(&self, address: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(&normalize_address(address))
            .and_then(|e| e.network_name.clone())
    }

    /// Take both values for `address` as status-style text, if both are
    /// present. The entry is removed.
    #[must_use]
    pub fn take(&self, address: &str) -> Option<String> {
        let key = normalize_address(address);
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = entries.get(&key)?;
        if entry.network_name.is_none() || entry.passphrase.is_none() {
            return None;
        }
        let entry = entries.remove(&key)?;
        Some(format!(
            "{NETWORK_NAME_KEY}={}\n{PASSPHRASE_KEY}={}\n",
            entry.network_name.unwrap_or_default(),
            entry.passphrase.unwrap_or_default()
        ))
    }

    /// Forget anything written by `address`.
    pub fn clear(&self, address: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(&normalize_address(address));
    }
}

/// Waits for the peer to write the network name and passphrase
/// characteristics.
pub struct CharacteristicWriteStrategy {
    inbox: CredentialInbox,
    listen: Duration,
    interval: Duration,
    policy: StrategyPolicy,
}

impl CharacteristicWriteStrategy {
    /// Create the strategy reading from `inbox`.
    #[must_use]
    pub fn new(inbox: CredentialInbox, config: &GattConfig) -> Self {
        Self {
            inbox,
            listen: config.listen(),
            interval: config.poll_interval(),
            policy: config.policy(),
        }
    }
}

#[async_trait]
impl Strategy for CharacteristicWriteStrategy {
    fn kind(&self) -> ExtractionStrategy {
        ExtractionStrategy::CharacteristicWrite
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn attempt(&self, session: &Session) -> StrategyOutcome {
        let address = &session.peer().address;
        let window = self.listen.min(session.remaining());
        info!(
            session_id = %session.id(),
            peer = %address,
            window_secs = window.as_secs(),
            "Waiting for credential characteristic writes"
        );

        let inbox = &self.inbox;
        let outcome = poll_until(
            attempts_within(window, self.interval),
            self.interval,
            session.cancel_token(),
            |_| async move { inbox.take(address) },
        )
        .await;

        match outcome {
            PollOutcome::Ready(text) => {
                match extract_candidate(&text, ExtractionStrategy::CharacteristicWrite) {
                    Ok(candidate) => StrategyOutcome::CredentialFound(candidate),
                    Err(e) => {
                        debug!(session_id = %session.id(), error = %e, "Written values rejected");
                        StrategyOutcome::NoCredential
                    }
                }
            }
            PollOutcome::Exhausted { .. } | PollOutcome::Cancelled => StrategyOutcome::NoCredential,
        }
    }
}

/// Watches the local hotspot for the peer joining it.
///
/// A client joining shows the peer is cooperating but carries no
/// credential, so this strategy reports `NoCredential` either way.
pub struct HotspotCaptureStrategy {
    inspector: Arc<dyn LinkInspector>,
    interface: String,
    subnet_prefix: String,
    listen: Duration,
    interval: Duration,
    policy: StrategyPolicy,
}

impl HotspotCaptureStrategy {
    /// Create the strategy over `inspector`.
    #[must_use]
    pub fn new(inspector: Arc<dyn LinkInspector>, config: &HotspotConfig) -> Self {
        Self {
            inspector,
            interface: config.interface.clone(),
            subnet_prefix: config.subnet_prefix.clone(),
            listen: config.listen(),
            interval: config.poll_interval(),
            policy: config.policy(),
        }
    }

    async fn hotspot_client(&self) -> crate::error::Result<Option<String>> {
        let table = self.inspector.neighbors().await?;
        Ok(parse_neighbors(&table)
            .into_iter()
            .find(|n| {
                n.interface == self.interface
                    && n.ip.starts_with(&self.subnet_prefix)
                    && n.hw_address.is_some()
            })
            .map(|n| n.ip))
    }
}

#[async_trait]
impl Strategy for HotspotCaptureStrategy {
    fn kind(&self) -> ExtractionStrategy {
        ExtractionStrategy::HotspotCapture
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn attempt(&self, session: &Session) -> StrategyOutcome {
        // An inspector that cannot run at all is an error, not an empty table.
        if let Err(e) = self.inspector.neighbors().await {
            return StrategyOutcome::StrategyError(format!("neighbour table unavailable: {e}"));
        }

        let window = self.listen.min(session.remaining());
        let outcome = poll_until(
            attempts_within(window, self.interval),
            self.interval,
            session.cancel_token(),
            |_| async move { self.hotspot_client().await.ok().flatten() },
        )
        .await;

        if let PollOutcome::Ready(ip) = outcome {
            info!(
                session_id = %session.id(),
                client = %ip,
                "Client joined the hotspot, no credential shared"
            );
        }
        StrategyOutcome::NoCredential
    }
}

/// Reads what the Bluetooth stack knows about the peer and runs it through
/// the parser.
pub struct RadioOnlyStrategy {
    inspector: Arc<dyn LinkInspector>,
    policy: StrategyPolicy,
}

impl RadioOnlyStrategy {
    /// Create the strategy over `inspector`.
    #[must_use]
    pub fn new(inspector: Arc<dyn LinkInspector>, config: &RadioOnlyConfig) -> Self {
        Self {
            inspector,
            policy: config.policy(),
        }
    }
}

#[async_trait]
impl Strategy for RadioOnlyStrategy {
    fn kind(&self) -> ExtractionStrategy {
        ExtractionStrategy::RadioOnlyHeuristic
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn attempt(&self, session: &Session) -> StrategyOutcome {
        let info = match self.inspector.peer_info(&session.peer().address).await {
            Ok(info) => info,
            Err(e) => return StrategyOutcome::StrategyError(e.to_string()),
        };
        match extract_candidate(&info, ExtractionStrategy::RadioOnlyHeuristic) {
            Ok(candidate) => StrategyOutcome::CredentialFound(candidate),
            Err(e) => {
                debug!(session_id = %session.id(), error = %e, "Peer info carries no credential");
                StrategyOutcome::NoCredential
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::SystemLinkInspector;
    use crate::testing::{peer, ScriptedRunner};
    use tokio_util::sync::CancellationToken;

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    fn session() -> Session {
        Session::new(peer(ADDR), Duration::from_secs(90), CancellationToken::new())
    }

    fn inspector(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, Arc<dyn LinkInspector>) {
        let runner = Arc::new(runner);
        let inspector = SystemLinkInspector::new(runner.clone(), Duration::from_secs(5));
        (runner, Arc::new(inspector))
    }

    #[test]
    fn test_policy_floors_attempts() {
        assert_eq!(StrategyPolicy::new(Duration::ZERO, 0).max_attempts, 1);
    }

    #[test]
    fn test_inbox_needs_both_values() {
        let inbox = CredentialInbox::new();
        inbox.record_network_name("aa:bb:cc:dd:ee:01", "HomeNet");
        assert_eq!(inbox.take(ADDR), None);
        assert_eq!(inbox.network_name(ADDR).as_deref(), Some("HomeNet"));

        inbox.record_passphrase(ADDR, "s3cr3t\0");
        assert_eq!(inbox.take(ADDR).as_deref(), Some("ssid=HomeNet\npsk=s3cr3t\n"));
        assert_eq!(inbox.take(ADDR), None);
    }

    #[test]
    fn test_inbox_ignores_multiline_writes() {
        let inbox = CredentialInbox::new();
        inbox.record_network_name(ADDR, "Home\npsk=evil");
        assert_eq!(inbox.network_name(ADDR), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_characteristic_write_found() {
        let inbox = CredentialInbox::new();
        let strategy = CharacteristicWriteStrategy::new(inbox.clone(), &GattConfig::default());

        let writer = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            writer.record_network_name(ADDR, "HomeNet");
            writer.record_passphrase(ADDR, "s3cr3t");
        });

        match strategy.attempt(&session()).await {
            StrategyOutcome::CredentialFound(c) => {
                assert_eq!(c.network_name, "HomeNet");
                assert_eq!(c.provenance, ExtractionStrategy::CharacteristicWrite);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_characteristic_write_sentinel_is_no_credential() {
        let inbox = CredentialInbox::new();
        inbox.record_network_name(ADDR, "Unknown");
        inbox.record_passphrase(ADDR, "Unknown");
        let strategy = CharacteristicWriteStrategy::new(inbox, &GattConfig::default());

        assert_eq!(strategy.attempt(&session()).await, StrategyOutcome::NoCredential);
    }

    #[tokio::test(start_paused = true)]
    async fn test_characteristic_write_window_elapses() {
        let strategy =
            CharacteristicWriteStrategy::new(CredentialInbox::new(), &GattConfig::default());
        let start = tokio::time::Instant::now();

        assert_eq!(strategy.attempt(&session()).await, StrategyOutcome::NoCredential);
        assert!(start.elapsed() <= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotspot_client_is_no_credential() {
        let table = "Address HWtype HWaddress Flags Mask Iface\n\
                     192.168.4.7 ether aa:bb:cc:dd:ee:01 C wlan0\n";
        let (runner, inspector) = inspector(ScriptedRunner::new().reply("arp", table));
        let strategy = HotspotCaptureStrategy::new(inspector, &HotspotConfig::default());

        assert_eq!(strategy.attempt(&session()).await, StrategyOutcome::NoCredential);
        // Initial availability check plus one poll that saw the client.
        assert_eq!(runner.count("arp -n"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotspot_without_arp_is_error() {
        let (_, inspector) = inspector(ScriptedRunner::new().fail("arp"));
        let strategy = HotspotCaptureStrategy::new(inspector, &HotspotConfig::default());

        assert!(matches!(
            strategy.attempt(&session()).await,
            StrategyOutcome::StrategyError(_)
        ));
    }

    #[tokio::test]
    async fn test_radio_only_plain_info_is_no_credential() {
        let info = "Device AA:BB:CC:DD:EE:01 (public)\n\tName: Pixel 8\n\tPaired: yes\n";
        let (_, inspector) = inspector(ScriptedRunner::new().reply("bluetoothctl", info));
        let strategy = RadioOnlyStrategy::new(inspector, &RadioOnlyConfig::default());

        assert_eq!(strategy.attempt(&session()).await, StrategyOutcome::NoCredential);
    }

    #[tokio::test]
    async fn test_radio_only_tool_failure_is_error() {
        let (_, inspector) = inspector(ScriptedRunner::new());
        let strategy = RadioOnlyStrategy::new(inspector, &RadioOnlyConfig::default());

        assert!(matches!(
            strategy.attempt(&session()).await,
            StrategyOutcome::StrategyError(_)
        ));
    }
}
