//! Applying a persisted credential to the station interface.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::ConnectorConfig;
use crate::control::{RadioInterface, RadioLock};
use crate::parser::parse_interface_state;
use crate::poll::{poll_until, PollOutcome};
use crate::types::{ConnectionResult, PersistedCredential};

/// Joins the target network and verifies association.
///
/// The connector never retries beyond its verification bound and never
/// touches the credential store.
#[derive(Clone)]
pub struct NetworkConnector {
    radio: Arc<dyn RadioInterface>,
    lock: RadioLock,
    verify_attempts: u32,
    verify_interval: Duration,
}

impl NetworkConnector {
    /// Create a connector over `radio`, sharing `lock` with the P2P engine.
    #[must_use]
    pub fn new(radio: Arc<dyn RadioInterface>, lock: RadioLock, config: &ConnectorConfig) -> Self {
        Self {
            radio,
            lock,
            verify_attempts: config.verify_attempts,
            verify_interval: config.verify_interval(),
        }
    }

    /// Apply `credential` and poll until the interface reports it.
    #[instrument(skip_all, fields(network = %credential.network_name))]
    pub async fn apply(
        &self,
        credential: &PersistedCredential,
        cancel: &CancellationToken,
    ) -> ConnectionResult {
        let network_name = credential.network_name.as_str();
        let failed = |verify_polls| ConnectionResult {
            success: false,
            network_name: network_name.to_string(),
            verify_polls,
        };

        // Association completes after reconfigure returns; hold the radio
        // until it is verified.
        let Some(_radio) = self.lock.acquire_or_cancel(cancel).await else {
            return failed(0);
        };
        if let Err(e) = self
            .radio
            .apply_network_config(network_name, &credential.passphrase)
            .await
        {
            warn!(error = %e, "Applying network configuration failed");
            return failed(0);
        }

        let radio = &self.radio;
        let mut polls = 0;
        let outcome = poll_until(self.verify_attempts, self.verify_interval, cancel, |n| {
            polls = n;
            async move {
                let raw = radio.query_interface_state().await.ok()?;
                parse_interface_state(&raw)
                    .is_connected_to(network_name)
                    .then_some(())
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => {
                info!(polls, "Association verified");
                ConnectionResult {
                    success: true,
                    network_name: network_name.to_string(),
                    verify_polls: polls,
                }
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(attempts, "Association not verified");
                failed(attempts)
            }
            PollOutcome::Cancelled => failed(polls),
        }
    }
}
