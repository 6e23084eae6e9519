//! BlueZ integration via `bluer`.
//!
//! - [`open_adapter`] finds and powers the adapter.
//! - [`NotificationSource`] turns device connection changes into
//!   [`RadioNotification`](crate::monitor::RadioNotification)s.
//! - [`CredentialService`] publishes the GATT characteristics peers write
//!   the network name and passphrase to.

mod gatt;
mod source;

pub use gatt::{
    CredentialService, DEVICE_INFO_CHARACTERISTIC_UUID, NETWORK_NAME_CHARACTERISTIC_UUID,
    PASSPHRASE_CHARACTERISTIC_UUID, SERVICE_UUID,
};
pub use source::NotificationSource;

use bluer::{Adapter, Session};
use tracing::{info, warn};

use crate::error::{AirliftError, Result};

/// Open `name` (or the default adapter) and make sure it is powered.
///
/// # Errors
///
/// [`AirliftError::BluetoothAdapterNotFound`] if the daemon is unreachable or
/// has no such adapter, [`AirliftError::BluetoothAdapterPoweredOff`] if it
/// refuses to power on.
pub async fn open_adapter(name: Option<&str>) -> Result<Adapter> {
    let session = Session::new().await.map_err(|e| {
        warn!(error = %e, "Could not connect to bluetoothd");
        AirliftError::BluetoothAdapterNotFound
    })?;

    let adapter = match name {
        Some(name) => session.adapter(name),
        None => session.default_adapter().await,
    }
    .map_err(|e| {
        warn!(adapter = name.unwrap_or("default"), error = %e, "Adapter lookup failed");
        AirliftError::BluetoothAdapterNotFound
    })?;

    if !adapter.is_powered().await? {
        info!(adapter = adapter.name(), "Powering on Bluetooth adapter");
        adapter.set_powered(true).await.map_err(|e| {
            warn!(adapter = adapter.name(), error = %e, "Power on failed");
            AirliftError::BluetoothAdapterPoweredOff
        })?;
    }

    info!(adapter = adapter.name(), address = %adapter.address().await?, "Bluetooth adapter ready");
    Ok(adapter)
}
