use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use bluer::Adapter;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::strategy::CredentialInbox;
use crate::types::SENTINEL;

/// Primary service carrying the credential characteristics.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6a1f_0c00_5e7a_4d1b_9c2e_7f3a_b5d4_e001);
/// Read/write: the network name.
pub const NETWORK_NAME_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6a1f_0c01_5e7a_4d1b_9c2e_7f3a_b5d4_e001);
/// Write only: the passphrase.
pub const PASSPHRASE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6a1f_0c02_5e7a_4d1b_9c2e_7f3a_b5d4_e001);
/// Read only: JSON describing this device and the reader.
pub const DEVICE_INFO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6a1f_0c03_5e7a_4d1b_9c2e_7f3a_b5d4_e001);

/// The registered GATT application and its advertisement.
///
/// Both are withdrawn when this is dropped.
pub struct CredentialService {
    _app: ApplicationHandle,
    _adv: AdvertisementHandle,
}

impl CredentialService {
    /// Register the credential service on `adapter` and advertise it as
    /// `local_name`. Writes land in `inbox`, keyed by the writer's address.
    ///
    /// # Errors
    ///
    /// Returns an error if BlueZ rejects the application or advertisement.
    pub async fn start(adapter: &Adapter, local_name: &str, inbox: CredentialInbox) -> Result<Self> {
        adapter.set_alias(local_name.to_string()).await?;

        let service = Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![
                network_name_characteristic(inbox.clone()),
                passphrase_characteristic(inbox),
                device_info_characteristic(local_name.to_string()),
            ],
            ..Default::default()
        };
        let app = adapter
            .serve_gatt_application(Application {
                services: vec![service],
                ..Default::default()
            })
            .await?;

        let adv = adapter
            .advertise(Advertisement {
                service_uuids: std::iter::once(SERVICE_UUID).collect(),
                discoverable: Some(true),
                local_name: Some(local_name.to_string()),
                ..Default::default()
            })
            .await?;

        info!(adapter = adapter.name(), local_name, "Credential service advertised");
        Ok(Self {
            _app: app,
            _adv: adv,
        })
    }
}

fn decode(data: &[u8]) -> std::result::Result<String, ReqError> {
    String::from_utf8(data.to_vec()).map_err(|_| ReqError::Failed)
}

fn network_name_characteristic(inbox: CredentialInbox) -> Characteristic {
    let reader = inbox.clone();
    Characteristic {
        uuid: NETWORK_NAME_CHARACTERISTIC_UUID,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req: CharacteristicReadRequest| {
                let inbox = reader.clone();
                Box::pin(async move {
                    let value = inbox
                        .network_name(&req.device_address.to_string())
                        .unwrap_or_else(|| SENTINEL.to_string());
                    Ok(value.into_bytes())
                })
            }),
            ..Default::default()
        }),
        write: Some(CharacteristicWrite {
            write: true,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |data: Vec<u8>, req: CharacteristicWriteRequest| {
                    let inbox = inbox.clone();
                    Box::pin(async move {
                        let value = decode(&data)?;
                        let peer = req.device_address.to_string();
                        debug!(peer = %peer, network = %value, "Network name written");
                        inbox.record_network_name(&peer, &value);
                        Ok(())
                    })
                },
            )),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn passphrase_characteristic(inbox: CredentialInbox) -> Characteristic {
    Characteristic {
        uuid: PASSPHRASE_CHARACTERISTIC_UUID,
        write: Some(CharacteristicWrite {
            write: true,
            method: CharacteristicWriteMethod::Fun(Box::new(
                move |data: Vec<u8>, req: CharacteristicWriteRequest| {
                    let inbox = inbox.clone();
                    Box::pin(async move {
                        let value = decode(&data)?;
                        let peer = req.device_address.to_string();
                        debug!(peer = %peer, "Passphrase written");
                        inbox.record_passphrase(&peer, &value);
                        Ok(())
                    })
                },
            )),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn device_info_characteristic(local_name: String) -> Characteristic {
    Characteristic {
        uuid: DEVICE_INFO_CHARACTERISTIC_UUID,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req: CharacteristicReadRequest| {
                let local_name = local_name.clone();
                Box::pin(async move {
                    let info = serde_json::json!({
                        "name": local_name,
                        "peer": req.device_address.to_string(),
                        "version": env!("CARGO_PKG_VERSION"),
                        "served_at": Utc::now().to_rfc3339(),
                    });
                    Ok(info.to_string().into_bytes())
                })
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
