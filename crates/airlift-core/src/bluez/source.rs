use std::collections::HashMap;
use std::pin::pin;

use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty};
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::monitor::{device_path, RadioNotification};

/// Feeds device connection changes from one adapter into a channel.
///
/// Every known device gets a watcher on its `Connected` property. A device
/// turning connected is reported as an added device object, one turning
/// disconnected or disappearing as a removed one. Deduplication is left to
/// the [`DiscoveryMonitor`](crate::monitor::DiscoveryMonitor).
pub struct NotificationSource {
    adapter: Adapter,
    watchers: HashMap<Address, JoinHandle<()>>,
}

impl NotificationSource {
    /// Create a source for `adapter`.
    #[must_use]
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            watchers: HashMap::new(),
        }
    }

    /// Forward notifications into `tx` until `shutdown` fires, the receiver
    /// goes away or the adapter stops reporting events.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter event stream cannot be opened.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<RadioNotification>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let adapter = self.adapter.clone();
        let mut events = pin!(adapter.events().await?);

        for address in adapter.device_addresses().await? {
            self.watch(address, &tx);
        }
        info!(
            adapter = self.adapter.name(),
            devices = self.watchers.len(),
            "Watching device connections"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tx.closed() => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => self.watch(address, &tx),
                    Some(AdapterEvent::DeviceRemoved(address)) => {
                        if let Some(watcher) = self.watchers.remove(&address) {
                            watcher.abort();
                        }
                        let path = device_path(adapter.name(), &address.to_string());
                        if tx.send(RadioNotification::device_removed(path)).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!(adapter = adapter.name(), "Adapter event stream ended");
                        break;
                    }
                },
            }
        }

        for (_, watcher) in self.watchers.drain() {
            watcher.abort();
        }
        Ok(())
    }

    fn watch(&mut self, address: Address, tx: &mpsc::Sender<RadioNotification>) {
        if self.watchers.contains_key(&address) {
            return;
        }
        let device = match self.adapter.device(address) {
            Ok(device) => device,
            Err(e) => {
                debug!(peer = %address, error = %e, "Cannot open device");
                return;
            }
        };
        let adapter = self.adapter.name().to_string();
        let tx = tx.clone();
        let watcher = tokio::spawn(async move {
            if let Err(e) = watch_device(&adapter, device, tx).await {
                debug!(peer = %address, error = %e, "Device watcher stopped");
            }
        });
        self.watchers.insert(address, watcher);
    }
}

/// A device's link coming up (with its name at that moment) or going down.
#[derive(Debug)]
enum Link {
    Up(Option<String>),
    Down,
}

async fn watch_device(
    adapter: &str,
    device: Device,
    tx: mpsc::Sender<RadioNotification>,
) -> bluer::Result<()> {
    let address = device.address().to_string();
    let path = device_path(adapter, &address);
    let events = device.events().await?;

    let initial = if device.is_connected().await? {
        Some(Link::Up(device.name().await?))
    } else {
        None
    };
    let device = &device;
    let changes = events.filter_map(move |event| async move {
        match event {
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)) => {
                Some(Link::Up(device.name().await.ok().flatten()))
            }
            DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => Some(Link::Down),
            _ => None,
        }
    });

    forward_links(&path, &address, stream::iter(initial).chain(changes), &tx).await;
    Ok(())
}

/// Send a notification per link change until the links end or the receiver
/// goes away.
async fn forward_links(
    path: &str,
    address: &str,
    links: impl Stream<Item = Link>,
    tx: &mpsc::Sender<RadioNotification>,
) {
    let mut links = pin!(links);
    while let Some(link) = links.next().await {
        let notification = match link {
            Link::Up(name) => RadioNotification::device_added(path, address, name.as_deref()),
            Link::Down => RadioNotification::device_removed(path),
        };
        if tx.send(notification).await.is_err() {
            debug!(peer = address, "Notification receiver gone");
            return;
        }
    }
}
