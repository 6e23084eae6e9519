//! # airlift-core
//!
//! Core acquisition logic for airlift: a headless device that learns WiFi
//! credentials from a nearby phone and joins the network.
//!
//! When a phone connects over Bluetooth, a session runs a fixed list of
//! extraction strategies in priority order under one global deadline. The
//! first valid credential is persisted and applied to the station interface.
//!
//! ## Architecture
//!
//! - [`monitor`] - Radio notifications to peer connect/disconnect events
//! - [`dispatch`] - The event loop starting and cancelling sessions
//! - [`coordinator`] - Per-peer sessions and strategy fallback
//! - [`session`] - Session state, reports and handles
//! - [`strategy`] - The `Strategy` trait and the GATT, hotspot and radio-only strategies
//! - [`p2p`] - The WiFi Direct negotiation strategy
//! - [`parser`] - Pure parsers for tool output
//! - [`store`] - Durable credential storage
//! - [`connector`] - Applying a credential and verifying association
//! - [`control`] - Traits over the radio tools and their `wpa_cli`/`iwconfig` implementations
//! - [`tool`] - Running external programs with timeouts
//! - [`poll`] - Bounded, cancellable polling
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas
//! - `bluez` - BlueZ adapter, notifications and GATT service (feature `bluetooth`)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod config;
pub mod connector;
pub mod control;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod p2p;
pub mod parser;
pub mod poll;
pub mod session;
pub mod store;
pub mod strategy;
pub mod tool;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use crate::config::{
    AirliftConfig, BluetoothConfig, ConfigError, ConnectorConfig, GattConfig, HotspotConfig,
    P2pConfig, RadioOnlyConfig, ServerConfig, SessionConfig, StorageConfig, ToolsConfig,
};
pub use connector::NetworkConnector;
pub use control::{
    LinkInspector, P2pControl, RadioInterface, RadioLock, SupplicantRadio, SystemLinkInspector,
    WpaCli,
};
pub use coordinator::FallbackCoordinator;
pub use dispatch::Dispatcher;
pub use error::{AirliftError, Error, Result};
pub use monitor::{DiscoveryMonitor, PeerEvent, RadioNotification};
pub use p2p::NegotiationEngine;
pub use parser::{extract_candidate, is_valid_mac_address, ParseError};
pub use poll::{poll_until, PollOutcome};
pub use session::{Session, SessionHandle, SessionReport, SessionState};
pub use store::{CredentialStore, StoreError};
pub use strategy::{
    CharacteristicWriteStrategy, CredentialInbox, HotspotCaptureStrategy, RadioOnlyStrategy,
    Strategy, StrategyOutcome, StrategyPolicy,
};
pub use tool::{CommandRunner, SystemCommandRunner, ToolError};
pub use types::{
    ConnectionResult, CredentialCandidate, ExtractionStrategy, PeerDevice, PersistedCredential,
};
