//! Peer connect/disconnect detection.
//!
//! The radio stack reports objects appearing and disappearing on its bus. A
//! [`DiscoveryMonitor`] reduces that stream to one [`PeerEvent`] per physical
//! connection and disconnection, keyed by device address.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use crate::parser::is_valid_mac_address;
use crate::types::{normalize_address, PeerDevice};

/// Bus interface carried by remote device objects.
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";

/// Name used when a device does not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Properties grouped by interface name.
pub type InterfaceProperties = BTreeMap<String, BTreeMap<String, String>>;

/// A raw notification from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioNotification {
    /// An object gained interfaces.
    InterfaceAdded {
        /// Object path, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
        path: String,
        /// Interfaces with their properties.
        interfaces: InterfaceProperties,
    },
    /// An object lost interfaces.
    InterfaceRemoved {
        /// Object path.
        path: String,
        /// Names of the removed interfaces.
        interfaces: Vec<String>,
    },
}

impl RadioNotification {
    /// Notification for a device object appearing with `address` and `name`.
    #[must_use]
    pub fn device_added(path: impl Into<String>, address: &str, name: Option<&str>) -> Self {
        let mut props = BTreeMap::from([("Address".to_string(), address.to_string())]);
        if let Some(name) = name {
            props.insert("Name".to_string(), name.to_string());
        }
        Self::InterfaceAdded {
            path: path.into(),
            interfaces: BTreeMap::from([(DEVICE_INTERFACE.to_string(), props)]),
        }
    }

    /// Notification for a device object going away.
    #[must_use]
    pub fn device_removed(path: impl Into<String>) -> Self {
        Self::InterfaceRemoved {
            path: path.into(),
            interfaces: vec![DEVICE_INTERFACE.to_string()],
        }
    }
}

/// A peer coming or going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer connected and should be asked for a credential.
    PeerConnected(PeerDevice),
    /// A peer went away.
    PeerDisconnected {
        /// Its address.
        address: String,
    },
}

/// Object path of the device with `address` under `adapter`.
#[must_use]
pub fn device_path(adapter: &str, address: &str) -> String {
    format!(
        "/org/bluez/{adapter}/dev_{}",
        normalize_address(address).replace(':', "_")
    )
}

/// Address encoded in a device object path, if the path has one.
#[must_use]
pub fn address_from_path(path: &str) -> Option<String> {
    let (_, tail) = path.rsplit_once("/dev_")?;
    let address = tail.replace('_', ":");
    is_valid_mac_address(&address).then(|| normalize_address(&address))
}

/// Tracks connected peers and deduplicates notifications.
#[derive(Debug, Default)]
pub struct DiscoveryMonitor {
    connected: HashSet<String>,
    paths: HashMap<String, String>,
}

impl DiscoveryMonitor {
    /// Create a monitor with no connected peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn a notification into a peer event.
    ///
    /// Returns `None` for notifications that are not about devices, that are
    /// malformed, or that repeat an already known state.
    pub fn handle(&mut self, notification: &RadioNotification) -> Option<PeerEvent> {
        match notification {
            RadioNotification::InterfaceAdded { path, interfaces } => {
                self.on_added(path, interfaces)
            }
            RadioNotification::InterfaceRemoved { path, interfaces } => {
                self.on_removed(path, interfaces)
            }
        }
    }

    /// Addresses currently considered connected.
    #[must_use]
    pub fn connected_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.connected.iter().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Whether `address` is currently connected.
    #[must_use]
    pub fn is_connected(&self, address: &str) -> bool {
        self.connected.contains(&normalize_address(address))
    }

    fn on_added(&mut self, path: &str, interfaces: &InterfaceProperties) -> Option<PeerEvent> {
        let Some(props) = interfaces.get(DEVICE_INTERFACE) else {
            debug!(path, "Ignoring object without device interface");
            return None;
        };
        let Some(raw) = props.get("Address") else {
            debug!(path, "Ignoring device without address");
            return None;
        };
        if !is_valid_mac_address(raw) {
            debug!(path, address = %raw, "Ignoring device with invalid address");
            return None;
        }

        let address = normalize_address(raw);
        self.paths.insert(path.to_string(), address.clone());
        if !self.connected.insert(address.clone()) {
            debug!(peer = %address, "Duplicate connect notification");
            return None;
        }

        let name = props
            .get("Name")
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME);
        let peer = PeerDevice::new(&address, name);
        info!(peer = %peer.address, name = %peer.name, "Peer connected");
        Some(PeerEvent::PeerConnected(peer))
    }

    fn on_removed(&mut self, path: &str, interfaces: &[String]) -> Option<PeerEvent> {
        if !interfaces.iter().any(|i| i == DEVICE_INTERFACE) {
            return None;
        }
        let Some(address) = self.paths.remove(path).or_else(|| address_from_path(path)) else {
            debug!(path, "Ignoring removal of unknown object");
            return None;
        };
        if !self.connected.remove(&address) {
            debug!(peer = %address, "Removal of peer that was not connected");
            return None;
        }

        info!(peer = %address, "Peer disconnected");
        Some(PeerEvent::PeerDisconnected { address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01";

    #[test]
    fn test_connect_emits_once() {
        let mut monitor = DiscoveryMonitor::new();
        let added = RadioNotification::device_added(PATH, "aa:bb:cc:dd:ee:01", Some("Pixel 8"));

        let Some(PeerEvent::PeerConnected(peer)) = monitor.handle(&added) else {
            panic!("expected a connect event");
        };
        assert_eq!(peer.address, "AA:BB:CC:DD:EE:01");
        assert_eq!(peer.name, "Pixel 8");

        assert_eq!(monitor.handle(&added), None);
        assert_eq!(monitor.connected_addresses(), vec!["AA:BB:CC:DD:EE:01"]);
    }

    #[test]
    fn test_reconnect_after_disconnect_emits_again() {
        let mut monitor = DiscoveryMonitor::new();
        let added = RadioNotification::device_added(PATH, "AA:BB:CC:DD:EE:01", None);

        assert!(monitor.handle(&added).is_some());
        assert_eq!(
            monitor.handle(&RadioNotification::device_removed(PATH)),
            Some(PeerEvent::PeerDisconnected {
                address: "AA:BB:CC:DD:EE:01".into()
            })
        );
        assert!(!monitor.is_connected("AA:BB:CC:DD:EE:01"));
        assert!(matches!(
            monitor.handle(&added),
            Some(PeerEvent::PeerConnected(_))
        ));
    }

    #[test]
    fn test_missing_name_falls_back() {
        let mut monitor = DiscoveryMonitor::new();
        let added = RadioNotification::device_added(PATH, "AA:BB:CC:DD:EE:01", Some("  "));
        let Some(PeerEvent::PeerConnected(peer)) = monitor.handle(&added) else {
            panic!("expected a connect event");
        };
        assert_eq!(peer.name, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn test_malformed_notifications_are_ignored() {
        let mut monitor = DiscoveryMonitor::new();

        let adapter = RadioNotification::InterfaceAdded {
            path: "/org/bluez/hci0".into(),
            interfaces: BTreeMap::from([("org.bluez.Adapter1".to_string(), BTreeMap::new())]),
        };
        let no_address = RadioNotification::InterfaceAdded {
            path: PATH.into(),
            interfaces: BTreeMap::from([(DEVICE_INTERFACE.to_string(), BTreeMap::new())]),
        };
        let bad_address = RadioNotification::device_added(PATH, "not-a-mac", Some("Phone"));

        assert_eq!(monitor.handle(&adapter), None);
        assert_eq!(monitor.handle(&no_address), None);
        assert_eq!(monitor.handle(&bad_address), None);
        assert!(monitor.connected_addresses().is_empty());
    }

    #[test]
    fn test_removal_resolves_address_from_path() {
        let mut monitor = DiscoveryMonitor::new();
        let other_path = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_02";
        monitor.handle(&RadioNotification::device_added(
            "/somewhere/else",
            "AA:BB:CC:DD:EE:02",
            None,
        ));

        assert_eq!(
            monitor.handle(&RadioNotification::device_removed(other_path)),
            Some(PeerEvent::PeerDisconnected {
                address: "AA:BB:CC:DD:EE:02".into()
            })
        );
    }

    #[test]
    fn test_removal_of_unknown_or_non_device() {
        let mut monitor = DiscoveryMonitor::new();
        assert_eq!(monitor.handle(&RadioNotification::device_removed(PATH)), None);
        assert_eq!(
            monitor.handle(&RadioNotification::InterfaceRemoved {
                path: "/org/bluez/hci0/garbage".into(),
                interfaces: vec![DEVICE_INTERFACE.into()],
            }),
            None
        );
        assert_eq!(
            monitor.handle(&RadioNotification::InterfaceRemoved {
                path: PATH.into(),
                interfaces: vec!["org.bluez.MediaControl1".into()],
            }),
            None
        );
    }

    #[test]
    fn test_device_path_round_trip() {
        let path = device_path("hci0", "aa:bb:cc:dd:ee:01");
        assert_eq!(path, PATH);
        assert_eq!(address_from_path(&path).as_deref(), Some("AA:BB:CC:DD:EE:01"));
    }
}
