use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::transport::{AdvertisementCallback, DisconnectCallback, Transport};
use crate::device::types::{Advertisement, GattService};
use crate::error::DeviceError;

type PeripheralMap = Arc<Mutex<HashMap<String, Peripheral>>>;

fn device_id_of(id: &PeripheralId) -> String {
    format!("{:?}", id)
}

/// [`Transport`] backed by the first bluetooth adapter of the platform btleplug manager.
pub struct BtleTransport {
    adapter: Mutex<Option<Adapter>>,
    // every peripheral seen during a scan, keyed by device id
    peripherals: PeripheralMap,
    scan_cancel: Mutex<Option<CancellationToken>>,
    link_watchers: Mutex<HashMap<String, CancellationToken>>,
}

impl BtleTransport {
    pub fn new() -> Self {
        BtleTransport {
            adapter: Mutex::new(None),
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            scan_cancel: Mutex::new(None),
            link_watchers: Mutex::new(HashMap::new()),
        }
    }

    fn adapter(&self) -> Result<Adapter, DeviceError> {
        self.adapter
            .lock()
            .expect("Failed to lock adapter")
            .clone()
            .ok_or(DeviceError::AdapterNotAvailable)
    }

    fn peripheral(&self, device_id: &str) -> Result<Peripheral, DeviceError> {
        self.peripherals
            .lock()
            .expect("Failed to lock peripherals")
            .get(device_id)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownDevice(device_id.to_string()))
    }
}

impl Default for BtleTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn advertisement_for(adapter: &Adapter, id: &PeripheralId, peripherals: &PeripheralMap) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            debug!("Could not look up discovered peripheral: {}", err);
            return None;
        },
    };

    let name = match peripheral.properties().await {
        Ok(Some(properties)) => properties.local_name,
        Ok(None) => None,
        Err(err) => {
            debug!("Could not query peripheral for properties: {:?}", err);
            None
        },
    };

    let device_id = device_id_of(id);
    peripherals.lock().expect("Failed to lock peripherals").insert(device_id.clone(), peripheral);
    Some(Advertisement { device_id, name })
}

fn is_powered_on(state: Result<CentralState, btleplug::Error>) -> bool {
    match state {
        Ok(state) => {
            debug!("Adapter state {:?}", state);
            state == CentralState::PoweredOn
        },
        Err(err) => {
            // not every platform reports a power state
            debug!("Could not query adapter state: {}", err);
            true
        },
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn initialize(&self) -> Result<(), DeviceError> {
        if self.adapter.lock().expect("Failed to lock adapter").is_some() {
            return Ok(());
        }

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(DeviceError::AdapterNotAvailable)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        *self.adapter.lock().expect("Failed to lock adapter") = Some(adapter);
        Ok(())
    }

    async fn is_enabled(&self) -> Result<bool, DeviceError> {
        let state = self.adapter()?.adapter_state().await;
        Ok(is_powered_on(state))
    }

    async fn request_enable(&self) -> Result<(), DeviceError> {
        // btleplug has no way to power on an adapter
        warn!("Bluetooth appears to be disabled; enable it in the system settings");
        Err(DeviceError::BluetoothUnavailable)
    }

    async fn start_scan(&self, on_advertisement: AdvertisementCallback) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let cancel = CancellationToken::new();
        if let Some(previous) = self.scan_cancel.lock().expect("Failed to lock scan_cancel").replace(cancel.clone()) {
            previous.cancel();
        }

        let peripherals = self.peripherals.clone();
        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = events.next() => match event {
                        None => break 'mainloop,
                        Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                            if let Some(advertisement) = advertisement_for(&adapter, &id, &peripherals).await {
                                on_advertisement(advertisement);
                            }
                        },
                        Some(_) => {},
                    }
                }
            }
            debug!("Scan event task stopped");
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        if let Some(cancel) = self.scan_cancel.lock().expect("Failed to lock scan_cancel").take() {
            cancel.cancel();
        }
        self.adapter()?.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device_id: &str, on_disconnect: DisconnectCallback) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        let peripheral = self.peripheral(device_id)?;

        // subscribe before connecting so that an immediate drop is not missed
        let mut events = adapter.events().await?;
        peripheral.connect().await?;

        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .link_watchers
            .lock()
            .expect("Failed to lock link_watchers")
            .insert(device_id.to_string(), cancel.clone())
        {
            previous.cancel();
        }

        let peripheral_id = peripheral.id();
        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = events.next() => match event {
                        None => break 'mainloop,
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            on_disconnect();
                            break 'mainloop;
                        },
                        Some(_) => {},
                    }
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), DeviceError> {
        if let Some(cancel) = self.link_watchers.lock().expect("Failed to lock link_watchers").remove(device_id) {
            cancel.cancel();
        }
        self.peripheral(device_id)?.disconnect().await?;
        Ok(())
    }

    async fn get_services(&self, device_id: &str) -> Result<Vec<GattService>, DeviceError> {
        let peripheral = self.peripheral(device_id)?;
        peripheral.discover_services().await?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn read(&self, device_id: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, DeviceError> {
        let peripheral = self.peripheral(device_id)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(DeviceError::CharacteristicNotFound)?;

        debug!("Reading characteristic {:?} {:?}", service, characteristic);
        Ok(peripheral.read(&target).await?)
    }
}
