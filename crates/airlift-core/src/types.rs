//! Shared domain types.
//!
//! Session-specific types live in [`crate::session`]; this module holds the
//! values that flow between components.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placeholder value the negotiation tool reports when it has no real data.
pub const SENTINEL: &str = "Unknown";

/// A nearby device we are trying to obtain a credential from.
///
/// Identity is the address: two `PeerDevice`s with the same address are equal
/// regardless of name or discovery time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeerDevice {
    /// Bluetooth address, upper case (`AA:BB:CC:DD:EE:FF`).
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,

    /// Advertised name, or `"Unknown Device"`.
    #[schema(example = "Pixel 8")]
    pub name: String,

    /// When the connect notification was received.
    pub discovered_at: DateTime<Utc>,
}

impl PeerDevice {
    /// Create a peer discovered now. The address is normalised to upper case.
    #[must_use]
    pub fn new(address: impl AsRef<str>, name: impl Into<String>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            name: name.into(),
            discovered_at: Utc::now(),
        }
    }
}

impl PartialEq for PeerDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerDevice {}

impl Hash for PeerDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Canonical form of a device address used as a map key.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// The acquisition methods, in default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// WiFi Direct negotiation through the control-plane tool.
    P2pNegotiation,
    /// Waiting for the phone to write SSID/password GATT characteristics.
    CharacteristicWrite,
    /// Watching our own hotspot for the phone joining it.
    HotspotCapture,
    /// Reading whatever the Bluetooth stack knows about the peer.
    RadioOnlyHeuristic,
}

impl ExtractionStrategy {
    /// All strategies in priority order.
    pub const ALL: [Self; 4] = [
        Self::P2pNegotiation,
        Self::CharacteristicWrite,
        Self::HotspotCapture,
        Self::RadioOnlyHeuristic,
    ];

    /// Stable name used in logs and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P2pNegotiation => "p2p_negotiation",
            Self::CharacteristicWrite => "characteristic_write",
            Self::HotspotCapture => "hotspot_capture",
            Self::RadioOnlyHeuristic => "radio_only_heuristic",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential extracted from tool output, not yet accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialCandidate {
    /// Network name (SSID).
    pub network_name: String,
    /// Passphrase (PSK).
    pub passphrase: String,
    /// Strategy that produced it.
    pub provenance: ExtractionStrategy,
    /// Text the candidate was parsed from, kept for audit.
    pub raw_source: String,
}

impl CredentialCandidate {
    /// `true` iff both fields are non-empty and neither is the sentinel.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_real_value(&self.network_name) && is_real_value(&self.passphrase)
    }
}

// Passphrase and raw text stay out of logs.
impl fmt::Debug for CredentialCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCandidate")
            .field("network_name", &self.network_name)
            .field("passphrase", &"<redacted>")
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}

/// `true` if a field carries real data: non-empty and not the sentinel.
#[must_use]
pub fn is_real_value(value: &str) -> bool {
    !value.is_empty() && value != SENTINEL
}

/// The credential accepted by the store. Serialized as
/// `{"ssid": "...", "password": "..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredential {
    /// Network name.
    #[serde(rename = "ssid")]
    pub network_name: String,
    /// Passphrase.
    #[serde(rename = "password")]
    pub passphrase: String,
}

impl From<&CredentialCandidate> for PersistedCredential {
    fn from(candidate: &CredentialCandidate) -> Self {
        Self {
            network_name: candidate.network_name.clone(),
            passphrase: candidate.passphrase.clone(),
        }
    }
}

impl fmt::Debug for PersistedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedCredential")
            .field("network_name", &self.network_name)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Outcome of applying a credential to the radio interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionResult {
    /// Whether association with `network_name` was confirmed.
    pub success: bool,
    /// The network that was applied.
    #[schema(example = "HomeNet")]
    pub network_name: String,
    /// Number of association polls performed.
    pub verify_polls: u32,
}
