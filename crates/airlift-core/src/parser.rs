//! Parsing of the negotiation tool's line-oriented output.
//!
//! `wpa_cli` reports status as `key=value` lines and peer details as
//! repeated device records. Everything here is pure: no I/O, and the same
//! input always gives the same output.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::{is_real_value, CredentialCandidate, ExtractionStrategy, SENTINEL};

/// Key carrying the network name in status output.
pub const NETWORK_NAME_KEY: &str = "ssid";

/// Key carrying the passphrase in status output.
pub const PASSPHRASE_KEY: &str = "psk";

/// Key that opens a new record in peer-list output.
pub const PEER_ADDRESS_MARKER: &str = "dev_addr";

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address regex is valid")
});

/// Returns `true` for a colon-separated 48-bit address.
#[must_use]
pub fn is_valid_mac_address(value: &str) -> bool {
    MAC_ADDRESS.is_match(value.trim())
}

/// Why no credential could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required key was absent.
    #[error("missing '{key}' in tool output")]
    MissingKey {
        /// The absent key.
        key: &'static str,
    },

    /// A required key was present but empty or the sentinel.
    #[error("'{key}' carries no real value ({value:?})")]
    Placeholder {
        /// The key.
        key: &'static str,
        /// What it contained (never the passphrase itself).
        value: String,
    },
}

/// Parse `key=value` lines into a map.
///
/// Lines without `=` (or with an empty key) are skipped. Keys and values are
/// trimmed. For a repeated key the last value wins.
#[must_use]
pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(split_pair)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Extract a credential candidate from status-style output.
///
/// # Errors
///
/// Returns [`ParseError`] if either the network name or passphrase key is
/// missing, empty, or equal to the `"Unknown"` sentinel.
pub fn extract_candidate(
    text: &str,
    provenance: ExtractionStrategy,
) -> Result<CredentialCandidate, ParseError> {
    let fields = parse_key_values(text);
    let network_name = required(&fields, NETWORK_NAME_KEY, true)?;
    let passphrase = required(&fields, PASSPHRASE_KEY, false)?;

    Ok(CredentialCandidate {
        network_name,
        passphrase,
        provenance,
        raw_source: text.to_string(),
    })
}

fn required(
    fields: &BTreeMap<String, String>,
    key: &'static str,
    reveal: bool,
) -> Result<String, ParseError> {
    let value = fields.get(key).ok_or(ParseError::MissingKey { key })?;
    if is_real_value(value) {
        return Ok(value.clone());
    }
    let shown = if reveal || value.is_empty() || value == SENTINEL {
        value.clone()
    } else {
        "<redacted>".to_string()
    };
    Err(ParseError::Placeholder { key, value: shown })
}

/// One device record from peer-list output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRecord {
    /// Device address that opened the record.
    pub address: String,
    /// `dev_name`, if reported.
    pub name: Option<String>,
    /// `p2p_dev_addr`, if reported.
    pub p2p_address: Option<String>,
    /// `p2p_go_intent`, if reported.
    pub go_intent: Option<String>,
    /// `p2p_dev_capab`, if reported.
    pub capabilities: Option<String>,
    /// Any other keys in the record.
    pub extra: BTreeMap<String, String>,
}

impl PeerRecord {
    fn open(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Self::default()
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        let value = value.to_string();
        match key {
            "dev_name" => self.name = Some(value),
            "p2p_dev_addr" => self.p2p_address = Some(value),
            "p2p_go_intent" => self.go_intent = Some(value),
            "p2p_dev_capab" => self.capabilities = Some(value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Address to hand to `p2p_connect`: the P2P device address when known.
    #[must_use]
    pub fn connect_address(&self) -> &str {
        self.p2p_address.as_deref().unwrap_or(&self.address)
    }
}

/// Group peer-list output into device records.
///
/// A `dev_addr=` line (or a bare MAC address line, which is how
/// `wpa_cli p2p_peers` prints peers) closes the record in progress and opens a
/// new one. Lines before the first marker are ignored. The final record is
/// flushed at end of input.
#[must_use]
pub fn parse_peer_list(text: &str) -> Vec<PeerRecord> {
    let mut records = Vec::new();
    let mut current: Option<PeerRecord> = None;

    for line in text.lines().map(str::trim) {
        let opened = if is_valid_mac_address(line) {
            Some(line)
        } else {
            match split_pair(line) {
                Some((PEER_ADDRESS_MARKER, address)) if !address.is_empty() => Some(address),
                Some((key, value)) => {
                    if let Some(record) = current.as_mut() {
                        record.set(key, value);
                    }
                    None
                }
                None => None,
            }
        };

        if let Some(address) = opened {
            records.extend(current.replace(PeerRecord::open(address)));
        }
    }

    records.extend(current);
    records
}

/// `true` if `wpa_cli status` shows a formed P2P link in either role.
#[must_use]
pub fn is_p2p_established(status: &str) -> bool {
    let fields = parse_key_values(status);
    ["p2p_go_mode", "p2p_client_mode"]
        .iter()
        .any(|key| fields.get(*key).is_some_and(|v| v == "1"))
}

/// `true` if group info output names a formed group.
#[must_use]
pub fn is_group_formed(group_info: &str) -> bool {
    parse_key_values(group_info)
        .get("group_id")
        .is_some_and(|v| !v.is_empty())
}

/// Association state of the station interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceState {
    /// Reported ESSID, `None` for `off/any` or when absent.
    pub essid: Option<String>,
    /// Whether an access point is associated.
    pub associated: bool,
}

impl InterfaceState {
    /// `true` if associated with exactly `network_name`.
    #[must_use]
    pub fn is_connected_to(&self, network_name: &str) -> bool {
        self.associated && self.essid.as_deref() == Some(network_name)
    }
}

/// Parse `iwconfig <iface>` output.
#[must_use]
pub fn parse_interface_state(output: &str) -> InterfaceState {
    let essid = output.find("ESSID:").and_then(|idx| {
        let rest = &output[idx + "ESSID:".len()..];
        if let Some(quoted) = rest.strip_prefix('"') {
            quoted.find('"').map(|end| quoted[..end].to_string())
        } else {
            // Unquoted values are `off/any` or similar placeholders.
            None
        }
    });
    let essid = essid.filter(|name| !name.is_empty());
    let associated = essid.is_some() && !output.contains("Not-Associated");
    InterfaceState { essid, associated }
}

/// One row of the kernel neighbour table (`arp -n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// IP address.
    pub ip: String,
    /// Hardware address, `None` while the entry is incomplete.
    pub hw_address: Option<String>,
    /// Interface the neighbour was seen on.
    pub interface: String,
}

/// Parse `arp -n` output. The header row and blank lines are skipped.
#[must_use]
pub fn parse_neighbors(output: &str) -> Vec<Neighbor> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (ip, interface) = (fields.first()?, fields.last()?);
            if fields.len() < 2 || *ip == "Address" {
                return None;
            }
            Some(Neighbor {
                ip: (*ip).to_string(),
                hw_address: fields
                    .iter()
                    .find(|f| is_valid_mac_address(f))
                    .map(|f| (*f).to_string()),
                interface: (*interface).to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const P2P: ExtractionStrategy = ExtractionStrategy::P2pNegotiation;

    #[test]
    fn test_key_values_skip_lines_without_separator() {
        let map = parse_key_values("Selected interface 'p2p-dev-wlan0'\nwpa_state=COMPLETED\n=orphan\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map["wpa_state"], "COMPLETED");
    }

    #[test]
    fn test_key_values_last_value_wins() {
        let map = parse_key_values("ssid=First\nssid=Second\n");
        assert_eq!(map["ssid"], "Second");
    }

    #[test]
    fn test_value_may_contain_separator() {
        let map = parse_key_values("psk=a=b=c\n");
        assert_eq!(map["psk"], "a=b=c");
    }

    #[test]
    fn test_extract_candidate_from_status() {
        let c = extract_candidate("ssid=HomeNet\npsk=s3cr3t\n", P2P).unwrap();
        assert_eq!(c.network_name, "HomeNet");
        assert_eq!(c.passphrase, "s3cr3t");
        assert_eq!(c.provenance, P2P);
        assert!(c.is_valid());
    }

    #[test]
    fn test_extract_is_idempotent() {
        let raw = "bssid=02:00:00:00:01:00\nssid=HomeNet\npsk=s3cr3t\nwpa_state=COMPLETED\n";
        assert_eq!(extract_candidate(raw, P2P), extract_candidate(raw, P2P));
    }

    #[test]
    fn test_sentinel_rejected() {
        let err = extract_candidate("ssid=Unknown\npsk=Unknown\n", P2P).unwrap_err();
        assert_eq!(
            err,
            ParseError::Placeholder {
                key: NETWORK_NAME_KEY,
                value: "Unknown".into()
            }
        );
    }

    #[test]
    fn test_missing_passphrase_rejected() {
        let err = extract_candidate("ssid=HomeNet\nwpa_state=COMPLETED\n", P2P).unwrap_err();
        assert_eq!(err, ParseError::MissingKey { key: PASSPHRASE_KEY });
    }

    #[test]
    fn test_empty_value_rejected() {
        assert!(extract_candidate("ssid=HomeNet\npsk=\n", P2P).is_err());
    }

    #[test]
    fn test_peer_list_delimits_consecutive_records() {
        let raw = "\
dev_addr=aa:aa:aa:aa:aa:01
dev_name=Pixel 8
p2p_go_intent=7
dev_addr=aa:aa:aa:aa:aa:02
dev_name=Galaxy
p2p_dev_capab=0x25
";
        let peers = parse_peer_list(raw);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address, "aa:aa:aa:aa:aa:01");
        assert_eq!(peers[0].name.as_deref(), Some("Pixel 8"));
        assert_eq!(peers[0].go_intent.as_deref(), Some("7"));
        assert_eq!(peers[0].capabilities, None);
        assert_eq!(peers[1].name.as_deref(), Some("Galaxy"));
        assert_eq!(peers[1].capabilities.as_deref(), Some("0x25"));
    }

    #[test]
    fn test_peer_list_flushes_final_record() {
        let peers = parse_peer_list("dev_addr=aa:aa:aa:aa:aa:01");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, "aa:aa:aa:aa:aa:01");
    }

    #[test]
    fn test_peer_list_ignores_lines_before_first_marker() {
        let peers = parse_peer_list("dev_name=orphan\nFAIL\n");
        assert!(peers.is_empty());
    }

    #[test]
    fn test_peer_list_bare_addresses() {
        let peers = parse_peer_list("aa:aa:aa:aa:aa:01\naa:aa:aa:aa:aa:02\n");
        let addrs: Vec<_> = peers.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(addrs, ["aa:aa:aa:aa:aa:01", "aa:aa:aa:aa:aa:02"]);
    }

    #[test]
    fn test_connect_address_prefers_p2p_address() {
        let peers = parse_peer_list("dev_addr=aa:aa:aa:aa:aa:01\np2p_dev_addr=ba:aa:aa:aa:aa:01\n");
        assert_eq!(peers[0].connect_address(), "ba:aa:aa:aa:aa:01");
    }

    #[test]
    fn test_p2p_established() {
        assert!(is_p2p_established("wpa_state=COMPLETED\np2p_client_mode=1\n"));
        assert!(is_p2p_established("p2p_go_mode=1\n"));
        assert!(!is_p2p_established("p2p_go_mode=0\np2p_client_mode=0\n"));
        assert!(!is_p2p_established("wpa_state=SCANNING\n"));
    }

    #[test]
    fn test_group_formed() {
        assert!(is_group_formed("group_id=DIRECT-xy\n"));
        assert!(!is_group_formed("group_id=\n"));
        assert!(!is_group_formed("FAIL\n"));
    }

    #[test]
    fn test_interface_state_associated() {
        let raw = "wlan0     IEEE 802.11  ESSID:\"Home Net\"\n          Mode:Managed  Access Point: 11:22:33:44:55:66\n";
        let state = parse_interface_state(raw);
        assert_eq!(state.essid.as_deref(), Some("Home Net"));
        assert!(state.associated);
        assert!(state.is_connected_to("Home Net"));
        assert!(!state.is_connected_to("Home"));
    }

    #[test]
    fn test_interface_state_unassociated() {
        let raw = "wlan0     IEEE 802.11  ESSID:off/any\n          Mode:Managed  Access Point: Not-Associated\n";
        let state = parse_interface_state(raw);
        assert_eq!(state, InterfaceState::default());
    }

    #[test]
    fn test_neighbors() {
        let raw = "\
Address                  HWtype  HWaddress           Flags Mask            Iface
192.168.4.23             ether   aa:bb:cc:dd:ee:ff   C                     wlan0
192.168.4.9                      (incomplete)                              wlan0

10.0.0.1                 ether   11:22:33:44:55:66   C                     eth0
";
        let rows = parse_neighbors(raw);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].ip, "192.168.4.23");
        assert_eq!(rows[0].hw_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(rows[0].interface, "wlan0");
        assert_eq!(rows[1].hw_address, None);
        assert_eq!(rows[2].interface, "eth0");
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address(" aa:bb:cc:dd:ee:ff "));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("Unknown"));
    }
}
