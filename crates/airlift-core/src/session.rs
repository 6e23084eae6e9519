//! Acquisition sessions.
//!
//! A [`Session`] is owned by the task that runs it. Its observable state lives
//! in a `watch` channel so the coordinator and any [`SessionHandle`] can read
//! it without locking the task, and so cancellation can force the terminal
//! `Cancelled` state from outside.
//!
//! Terminal states are sticky: once a session is `Succeeded`, `Exhausted`,
//! `TimedOut`, `Cancelled` or `Failed`, further transitions are refused.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::types::{ConnectionResult, ExtractionStrategy, PeerDevice};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Accepted, task not yet running.
    Idle,
    /// Peer accepted, preparing the strategy list.
    Discovering,
    /// Running one strategy.
    Negotiating {
        /// The strategy in progress.
        strategy: ExtractionStrategy,
    },
    /// Persisting and applying a found credential.
    Applying,
    /// Credential persisted and association verified.
    Succeeded {
        /// Network that was joined.
        network_name: String,
    },
    /// Every strategy ran without producing a credential.
    Exhausted,
    /// Not enough time was left for the next strategy.
    TimedOut,
    /// The peer went away or the session was cancelled.
    Cancelled,
    /// Persistence or association failed.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl SessionState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted | Self::TimedOut | Self::Cancelled | Self::Failed { .. }
        )
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Negotiating { .. } => "negotiating",
            Self::Applying => "applying",
            Self::Succeeded { .. } => "succeeded",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negotiating { strategy } => write!(f, "negotiating ({strategy})"),
            Self::Succeeded { network_name } => write!(f, "succeeded ({network_name})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionReport {
    /// Session identifier.
    pub id: Uuid,
    /// The peer being asked.
    pub peer: PeerDevice,
    /// Current state.
    pub state: SessionState,
    /// Strategies started so far, in order.
    pub attempted: Vec<ExtractionStrategy>,
    /// Result of applying the credential, once known.
    pub connection: Option<ConnectionResult>,
    /// When the session was opened.
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

/// One acquisition attempt against one peer.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    peer: PeerDevice,
    deadline: Instant,
    cancel: CancellationToken,
    reporter: Arc<watch::Sender<SessionReport>>,
}

impl Session {
    /// Open a session for `peer` with `budget` from now.
    #[must_use]
    pub fn new(peer: PeerDevice, budget: Duration, cancel: CancellationToken) -> Self {
        let id = Uuid::new_v4();
        let report = SessionReport {
            id,
            peer: peer.clone(),
            state: SessionState::Idle,
            attempted: Vec::new(),
            connection: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        let (reporter, _) = watch::channel(report);
        Self {
            id,
            peer,
            deadline: Instant::now() + budget,
            cancel,
            reporter: Arc::new(reporter),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The peer being asked.
    #[must_use]
    pub const fn peer(&self) -> &PeerDevice {
        &self.peer
    }

    /// When the global budget runs out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Token cancelled when the session must stop.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the session has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.reporter.borrow().state.clone()
    }

    /// Current snapshot.
    #[must_use]
    pub fn report(&self) -> SessionReport {
        self.reporter.borrow().clone()
    }

    /// A handle observing this session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            address: self.peer.address.clone(),
            rx: self.reporter.subscribe(),
        }
    }

    pub(crate) fn reporter(&self) -> Arc<watch::Sender<SessionReport>> {
        Arc::clone(&self.reporter)
    }

    /// Move to `next`. Returns `false` if the session is already terminal.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        transition(&self.reporter, next)
    }

    /// Enter `Negotiating` for `strategy`, recording it on its first attempt.
    pub(crate) fn begin_strategy(&self, strategy: ExtractionStrategy) -> bool {
        self.reporter.send_if_modified(|report| {
            if report.state.is_terminal() {
                return false;
            }
            if report.attempted.last() != Some(&strategy) {
                report.attempted.push(strategy);
            }
            report.state = SessionState::Negotiating { strategy };
            true
        })
    }

    pub(crate) fn record_connection(&self, result: ConnectionResult) {
        self.reporter.send_modify(|report| report.connection = Some(result));
    }
}

/// Apply `next` to a published report unless it is already terminal.
pub(crate) fn transition(reporter: &watch::Sender<SessionReport>, next: SessionState) -> bool {
    reporter.send_if_modified(|report| {
        if report.state.is_terminal() {
            debug!(
                session_id = %report.id,
                current = report.state.name(),
                refused = next.name(),
                "Ignoring transition out of terminal state"
            );
            return false;
        }
        if next.is_terminal() {
            report.finished_at = Some(Utc::now());
        }
        report.state = next;
        true
    })
}

/// Observer of a running or finished session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    address: String,
    rx: watch::Receiver<SessionReport>,
}

impl SessionHandle {
    pub(crate) fn from_parts(id: Uuid, address: &str, rx: watch::Receiver<SessionReport>) -> Self {
        Self {
            id,
            address: address.to_string(),
            rx,
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Peer address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.rx.borrow().state.clone()
    }

    /// Current snapshot.
    #[must_use]
    pub fn report(&self) -> SessionReport {
        self.rx.borrow().clone()
    }

    /// Wait until the session is terminal and return the final snapshot.
    pub async fn wait(mut self) -> SessionReport {
        // The sender can only be dropped after the final state is published.
        let _ = self.rx.wait_for(|report| report.state.is_terminal()).await;
        self.report()
    }
}
