//! WiFi Direct negotiation.
//!
//! The [`NegotiationEngine`] drives the control-plane tool through peer
//! discovery, a push-button connection to each discovered peer in turn, and
//! status queries, handing every piece of returned text to the parser. When
//! no peer yields a credential it falls back to three secondary requests
//! against the first discovered peer: service discovery, group formation and
//! a plain peer-info query.
//!
//! Every tool call carries its own timeout and a failed call only ends the
//! current sub-attempt. The session deadline and cancellation are checked
//! before each peer and each secondary request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::P2pConfig;
use crate::control::{P2pControl, RadioLock, PUSH_BUTTON};
use crate::parser::{extract_candidate, is_group_formed, is_p2p_established, parse_peer_list, PeerRecord};
use crate::poll::{poll_until, sleep_or_cancel, PollOutcome};
use crate::session::Session;
use crate::strategy::{Strategy, StrategyOutcome, StrategyPolicy};
use crate::types::{CredentialCandidate, ExtractionStrategy};

/// Timings and parameters for one negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationSettings {
    /// Bound on the discovery command.
    pub discover_timeout: Duration,
    /// Wait after discovery.
    pub settle: Duration,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Status polls per peer.
    pub poll_attempts: u32,
    /// Wait after a service-discovery request.
    pub service_discovery_wait: Duration,
    /// Service-discovery query.
    pub service_query: String,
    /// Wait after group formation.
    pub group_wait: Duration,
}

impl From<&P2pConfig> for NegotiationSettings {
    fn from(config: &P2pConfig) -> Self {
        Self {
            discover_timeout: config.discover_timeout(),
            settle: config.settle(),
            poll_interval: config.poll_interval(),
            poll_attempts: config.poll_attempts,
            service_discovery_wait: config.service_discovery_wait(),
            service_query: config.service_query.clone(),
            group_wait: config.group_wait(),
        }
    }
}

enum PeerConnection {
    Established,
    Rejected,
    NotEstablished,
    Cancelled,
}

/// Drives WiFi Direct negotiation for the P2P strategy.
pub struct NegotiationEngine {
    control: Arc<dyn P2pControl>,
    radio: RadioLock,
    settings: NegotiationSettings,
    policy: StrategyPolicy,
}

impl NegotiationEngine {
    /// Create an engine over `control`, sharing `radio` with the connector.
    #[must_use]
    pub fn new(control: Arc<dyn P2pControl>, radio: RadioLock, config: &P2pConfig) -> Self {
        Self {
            control,
            radio,
            settings: NegotiationSettings::from(config),
            policy: config.policy(),
        }
    }

    /// Run one full negotiation for `session`'s peer.
    #[instrument(skip_all, fields(session_id = %session.id(), peer = %session.peer().address))]
    pub async fn negotiate(&self, session: &Session) -> StrategyOutcome {
        let outcome = self.run(session).await;
        if let Err(e) = self.control.stop_find().await {
            debug!(error = %e, "p2p_stop_find failed");
        }
        outcome
    }

    async fn run(&self, session: &Session) -> StrategyOutcome {
        let cancel = session.cancel_token();

        {
            // Discovery keeps running on the radio after p2p_find returns.
            let Some(_radio) = self.radio.acquire_or_cancel(cancel).await else {
                return StrategyOutcome::NoCredential;
            };
            info!(timeout_secs = self.settings.discover_timeout.as_secs(), "Discovering WiFi Direct peers");
            if let Err(e) = self.control.discover_peers(self.settings.discover_timeout).await {
                warn!(error = %e, "Peer discovery failed");
                return StrategyOutcome::StrategyError(format!("peer discovery failed: {e}"));
            }
            if !sleep_or_cancel(self.settings.settle, cancel).await {
                return StrategyOutcome::NoCredential;
            }
        }

        let peers = match self.control.list_peers().await {
            Ok(text) => parse_peer_list(&text),
            Err(e) => return StrategyOutcome::StrategyError(format!("listing peers failed: {e}")),
        };
        if peers.is_empty() {
            info!("No WiFi Direct peers found");
            return StrategyOutcome::NoCredential;
        }
        info!(count = peers.len(), "WiFi Direct peers found");

        for (index, peer) in peers.iter().enumerate() {
            if session.is_cancelled() {
                return StrategyOutcome::NoCredential;
            }
            if session.remaining().is_zero() {
                info!(tried = index, "Session deadline reached in connect loop");
                return StrategyOutcome::NoCredential;
            }

            match self.connect(peer, session).await {
                PeerConnection::Established => {
                    if let Some(candidate) = self.read_status().await {
                        return StrategyOutcome::CredentialFound(candidate);
                    }
                    info!(peer = %peer.address, "Connected but status carries no credential");
                    break;
                }
                PeerConnection::Rejected | PeerConnection::NotEstablished => {}
                PeerConnection::Cancelled => return StrategyOutcome::NoCredential,
            }
        }

        self.secondary(&peers[0], session).await
    }

    async fn connect(&self, peer: &PeerRecord, session: &Session) -> PeerConnection {
        let address = peer.connect_address();
        let Some(_radio) = self.radio.acquire_or_cancel(session.cancel_token()).await else {
            return PeerConnection::Cancelled;
        };
        info!(peer = address, name = ?peer.name, "Connecting to peer");
        if let Err(e) = self.control.connect_peer(address, PUSH_BUTTON).await {
            warn!(peer = address, error = %e, "Connect request failed");
            return PeerConnection::Rejected;
        }

        let control = &self.control;
        let outcome = poll_until(
            self.settings.poll_attempts,
            self.settings.poll_interval,
            session.cancel_token(),
            |_| async move {
                match control.query_status().await {
                    Ok(status) if is_p2p_established(&status) => Some(()),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(error = %e, "Status query failed");
                        None
                    }
                }
            },
        )
        .await;

        match outcome {
            PollOutcome::Ready(()) => {
                info!(peer = address, "WiFi Direct connection established");
                PeerConnection::Established
            }
            PollOutcome::Exhausted { attempts } => {
                info!(peer = address, attempts, "Connection not established");
                PeerConnection::NotEstablished
            }
            PollOutcome::Cancelled => PeerConnection::Cancelled,
        }
    }

    async fn read_status(&self) -> Option<CredentialCandidate> {
        match self.control.query_status().await {
            Ok(status) => parse(&status, "status"),
            Err(e) => {
                warn!(error = %e, "Status query failed after connecting");
                None
            }
        }
    }

    async fn secondary(&self, peer: &PeerRecord, session: &Session) -> StrategyOutcome {
        let address = peer.connect_address();
        let cancel = session.cancel_token();
        info!(peer = address, "Trying secondary negotiation methods");

        if !can_continue(session) {
            return StrategyOutcome::NoCredential;
        }
        match self
            .control
            .service_discovery_request(address, &self.settings.service_query)
            .await
        {
            Ok(()) => {
                let wait = self.settings.service_discovery_wait.min(session.remaining());
                if !sleep_or_cancel(wait, cancel).await {
                    return StrategyOutcome::NoCredential;
                }
                match self.control.service_discovery_response().await {
                    Ok(text) => {
                        if let Some(c) = parse(&text, "service discovery") {
                            return StrategyOutcome::CredentialFound(c);
                        }
                    }
                    Err(e) => debug!(error = %e, "No service discovery response"),
                }
            }
            Err(e) => warn!(error = %e, "Service discovery request failed"),
        }

        if !can_continue(session) {
            return StrategyOutcome::NoCredential;
        }
        let group_requested = {
            let Some(_radio) = self.radio.acquire_or_cancel(cancel).await else {
                return StrategyOutcome::NoCredential;
            };
            let requested = self.control.group_add().await;
            let wait = self.settings.group_wait.min(session.remaining());
            if requested.is_ok() && !sleep_or_cancel(wait, cancel).await {
                return StrategyOutcome::NoCredential;
            }
            requested
        };
        match group_requested {
            Ok(()) => match self.control.group_info().await {
                Ok(text) => {
                    if is_group_formed(&text) {
                        info!("WiFi Direct group formed");
                    }
                    if let Some(c) = parse(&text, "group info") {
                        return StrategyOutcome::CredentialFound(c);
                    }
                }
                Err(e) => debug!(error = %e, "Group info query failed"),
            },
            Err(e) => warn!(error = %e, "Group formation request failed"),
        }

        if !can_continue(session) {
            return StrategyOutcome::NoCredential;
        }
        match self.control.query_peer_info(address).await {
            Ok(text) => {
                if let Some(c) = parse(&text, "peer info") {
                    return StrategyOutcome::CredentialFound(c);
                }
            }
            Err(e) => warn!(error = %e, "Peer info query failed"),
        }

        StrategyOutcome::NoCredential
    }
}

fn can_continue(session: &Session) -> bool {
    !session.is_cancelled() && !session.remaining().is_zero()
}

fn parse(text: &str, source: &str) -> Option<CredentialCandidate> {
    match extract_candidate(text, ExtractionStrategy::P2pNegotiation) {
        Ok(candidate) => {
            info!(source, network = %candidate.network_name, "Credential found in tool output");
            Some(candidate)
        }
        Err(e) => {
            debug!(source, error = %e, "No credential in tool output");
            None
        }
    }
}

#[async_trait]
impl Strategy for NegotiationEngine {
    fn kind(&self) -> ExtractionStrategy {
        ExtractionStrategy::P2pNegotiation
    }

    fn policy(&self) -> StrategyPolicy {
        self.policy
    }

    async fn attempt(&self, session: &Session) -> StrategyOutcome {
        self.negotiate(session).await
    }
}
