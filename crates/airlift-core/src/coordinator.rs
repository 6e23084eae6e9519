//! The fallback coordinator.
//!
//! For every accepted peer the coordinator opens a [`Session`] with a global
//! deadline and runs the configured strategies in priority order on its own
//! task:
//!
//! ```text
//! Idle -> Discovering -> Negotiating(1) -> Negotiating(2) -> ... -> Exhausted
//!                              |                 |
//!                              +-> Applying -> Succeeded | Failed
//! ```
//!
//! Before each strategy (and each retry) the remaining budget is compared
//! with the strategy's `min_budget`; if it is short the session ends
//! `TimedOut` without starting it. The first valid credential is persisted
//! exactly once, then handed to the [`NetworkConnector`]. Cancellation forces
//! `Cancelled` immediately and is observed by the session task at every phase
//! boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::connector::NetworkConnector;
use crate::error::AirliftError;
use crate::session::{self, Session, SessionHandle, SessionReport, SessionState};
use crate::store::CredentialStore;
use crate::strategy::{Strategy, StrategyOutcome};
use crate::types::{normalize_address, CredentialCandidate, PeerDevice};

struct SessionEntry {
    id: Uuid,
    reporter: Arc<watch::Sender<SessionReport>>,
    cancel: CancellationToken,
}

impl SessionEntry {
    fn is_active(&self) -> bool {
        !self.reporter.borrow().state.is_terminal()
    }

    fn handle(&self, address: &str) -> SessionHandle {
        SessionHandle::from_parts(self.id, address, self.reporter.subscribe())
    }
}

struct Inner {
    strategies: Vec<Arc<dyn Strategy>>,
    store: CredentialStore,
    connector: NetworkConnector,
    global_deadline: Duration,
    shutdown: CancellationToken,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

/// Runs acquisition sessions, one per peer address.
#[derive(Clone)]
pub struct FallbackCoordinator {
    inner: Arc<Inner>,
}

impl FallbackCoordinator {
    /// Create a coordinator running `strategies` in the given order.
    #[must_use]
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        store: CredentialStore,
        connector: NetworkConnector,
        global_deadline: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                strategies,
                store,
                connector,
                global_deadline,
                shutdown: CancellationToken::new(),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The credential store sessions write to.
    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// The connector sessions apply credentials with.
    #[must_use]
    pub fn connector(&self) -> &NetworkConnector {
        &self.inner.connector
    }

    /// Open a session for `peer` and start it on a new task.
    ///
    /// If a session for the same address is still running its handle is
    /// returned and nothing new is started. Must be called from within a
    /// Tokio runtime.
    pub fn start_session(&self, peer: PeerDevice) -> SessionHandle {
        let address = normalize_address(&peer.address);
        let mut sessions = self.lock_sessions();

        if let Some(entry) = sessions.get(&address).filter(|e| e.is_active()) {
            info!(peer = %address, session_id = %entry.id, "Session already active");
            return entry.handle(&address);
        }

        let session = Session::new(
            peer,
            self.inner.global_deadline,
            self.inner.shutdown.child_token(),
        );
        let handle = session.handle();
        sessions.insert(
            address.clone(),
            SessionEntry {
                id: session.id(),
                reporter: session.reporter(),
                cancel: session.cancel_token().clone(),
            },
        );
        drop(sessions);

        let span = info_span!("session", session_id = %session.id(), peer = %address);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { run_session(&inner, &session).await }.instrument(span));
        handle
    }

    /// Cancel the active session for `address`.
    ///
    /// The session is marked `Cancelled` immediately. Returns `false` when
    /// there is no active session.
    pub fn cancel(&self, address: &str) -> bool {
        let address = normalize_address(address);
        let sessions = self.lock_sessions();
        let Some(entry) = sessions.get(&address) else {
            return false;
        };
        entry.cancel.cancel();
        let cancelled = session::transition(&entry.reporter, SessionState::Cancelled);
        if cancelled {
            info!(peer = %address, session_id = %entry.id, "Session cancelled");
        }
        cancelled
    }

    /// Current state of the latest session for `address`.
    #[must_use]
    pub fn status(&self, address: &str) -> Option<SessionState> {
        self.report(address).map(|r| r.state)
    }

    /// Snapshot of the latest session for `address`.
    #[must_use]
    pub fn report(&self, address: &str) -> Option<SessionReport> {
        self.lock_sessions()
            .get(&normalize_address(address))
            .map(|e| e.reporter.borrow().clone())
    }

    /// Snapshots of every known session, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<SessionReport> {
        let mut reports: Vec<_> = self
            .lock_sessions()
            .values()
            .map(|e| e.reporter.borrow().clone())
            .collect();
        reports.sort_by_key(|r| r.started_at);
        reports
    }

    /// Number of sessions not yet terminal.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_sessions().values().filter(|e| e.is_active()).count()
    }

    /// Cancel every running session.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for entry in self.lock_sessions().values() {
            session::transition(&entry.reporter, SessionState::Cancelled);
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_session(inner: &Inner, session: &Session) {
    info!(
        budget_secs = inner.global_deadline.as_secs(),
        strategies = inner.strategies.len(),
        "Session started"
    );
    session.transition(SessionState::Discovering);

    for strategy in &inner.strategies {
        let kind = strategy.kind();
        let policy = strategy.policy();

        let mut attempt = 0;
        loop {
            attempt += 1;
            if session.is_cancelled() {
                finish(session, SessionState::Cancelled);
                return;
            }
            let remaining = session.remaining();
            if remaining < policy.min_budget || remaining.is_zero() {
                info!(
                    strategy = %kind,
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "Not enough time left for next strategy"
                );
                finish(session, SessionState::TimedOut);
                return;
            }
            if !session.begin_strategy(kind) {
                return;
            }
            info!(strategy = %kind, attempt, "Running strategy");

            let outcome = strategy.attempt(session).await;
            if session.is_cancelled() {
                finish(session, SessionState::Cancelled);
                return;
            }

            match outcome {
                StrategyOutcome::CredentialFound(candidate) if inner.store.validate(&candidate) => {
                    info!(strategy = %kind, network = %candidate.network_name, "Credential found");
                    apply(inner, session, &candidate).await;
                    return;
                }
                StrategyOutcome::CredentialFound(_) => {
                    info!(strategy = %kind, "Candidate failed validation");
                    break;
                }
                StrategyOutcome::NoCredential => {
                    info!(strategy = %kind, "No credential");
                    break;
                }
                StrategyOutcome::StrategyError(reason) => {
                    warn!(strategy = %kind, attempt, %reason, "Strategy error");
                    if attempt >= policy.max_attempts {
                        break;
                    }
                }
            }
        }
    }

    finish(session, SessionState::Exhausted);
}

async fn apply(inner: &Inner, session: &Session, candidate: &CredentialCandidate) {
    if !session.transition(SessionState::Applying) {
        return;
    }
    if session.is_cancelled() {
        finish(session, SessionState::Cancelled);
        return;
    }

    let credential = match inner.store.persist(candidate) {
        Ok(credential) => credential,
        Err(e) => {
            let err = AirliftError::from(e);
            warn!(error = %err, "Could not persist credential");
            finish(
                session,
                SessionState::Failed {
                    reason: err.to_string(),
                },
            );
            return;
        }
    };

    let result = inner
        .connector
        .apply(&credential, session.cancel_token())
        .await;
    let success = result.success;
    session.record_connection(result);

    if success {
        finish(
            session,
            SessionState::Succeeded {
                network_name: credential.network_name,
            },
        );
    } else if session.is_cancelled() {
        finish(session, SessionState::Cancelled);
    } else {
        let err = AirliftError::ConnectionVerification {
            network: credential.network_name,
        };
        finish(
            session,
            SessionState::Failed {
                reason: err.to_string(),
            },
        );
    }
}

fn finish(session: &Session, state: SessionState) {
    let name = state.name();
    if session.transition(state) {
        info!(
            outcome = name,
            attempted = ?session.report().attempted,
            "Session finished"
        );
    }
}
