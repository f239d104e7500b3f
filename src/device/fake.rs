//! In-memory [`Transport`] for tests: scripted advertisements, services and read results.

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::device::constants::{SENSOR_MEASUREMENT_UUID, WEATHER_SERVICE_UUID};
use crate::device::transport::{AdvertisementCallback, DisconnectCallback, Transport};
use crate::device::types::{Advertisement, GattService};
use crate::error::DeviceError;

pub const REFERENCE_RECORD: [u8; 20] = [
    0x88, 0x13, 0x14, 0x08, 0x00, 0x00, 0x88, 0x13, 0xC2, 0x09,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

#[derive(Debug, Clone, Default)]
pub struct FakeCalls {
    pub initialized: usize,
    pub enable_requested: usize,
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub connects: Vec<String>,
    pub disconnects: Vec<String>,
    pub reads: usize,
}

pub struct FakeTransport {
    advertisements: Vec<Advertisement>,
    enabled: bool,
    stop_scan_fails: bool,
    connect_fails: bool,
    services: Vec<GattService>,
    payload: Result<Vec<u8>, String>,
    connect_gate: Option<Arc<Notify>>,
    read_gate: Option<Arc<Notify>>,
    calls: Mutex<FakeCalls>,
    listener: Mutex<Option<AdvertisementCallback>>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            advertisements: Vec::new(),
            enabled: true,
            stop_scan_fails: false,
            connect_fails: false,
            services: vec![GattService {
                uuid: WEATHER_SERVICE_UUID,
                characteristics: vec![Uuid::from_u128(1), SENSOR_MEASUREMENT_UUID],
            }],
            payload: Ok(REFERENCE_RECORD.to_vec()),
            connect_gate: None,
            read_gate: None,
            calls: Mutex::new(FakeCalls::default()),
            listener: Mutex::new(None),
            on_disconnect: Mutex::new(None),
        }
    }

    /// Advertisements are delivered in order with device ids `dev-0`, `dev-1`, ...
    pub fn with_advertisements(mut self, names: &[&str]) -> Self {
        self.advertisements = names
            .iter()
            .enumerate()
            .map(|(index, name)| Advertisement { device_id: format!("dev-{}", index), name: Some(name.to_string()) })
            .collect();
        self
    }

    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    pub fn without_measurement_characteristic(self) -> Self {
        self.with_services(vec![GattService { uuid: WEATHER_SERVICE_UUID, characteristics: vec![Uuid::from_u128(1)] }])
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Ok(payload);
        self
    }

    pub fn failing_read(mut self, message: &str) -> Self {
        self.payload = Err(message.to_string());
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    pub fn failing_stop_scan(mut self) -> Self {
        self.stop_scan_fails = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// `connect` waits on the gate before completing.
    pub fn with_connect_gate(mut self, gate: Arc<Notify>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    /// `read` waits on the gate before returning.
    pub fn with_read_gate(mut self, gate: Arc<Notify>) -> Self {
        self.read_gate = Some(gate);
        self
    }

    pub fn calls(&self) -> FakeCalls {
        self.calls.lock().unwrap().clone()
    }

    /// Deliver an advertisement to the scan in progress, if any.
    pub fn advertise(&self, device_id: &str, name: &str) {
        if let Some(on_advertisement) = self.listener.lock().unwrap().as_ref() {
            on_advertisement(Advertisement { device_id: device_id.to_string(), name: Some(name.to_string()) });
        }
    }

    /// Simulate the device dropping the link.
    pub fn drop_link(&self) {
        if let Some(on_disconnect) = self.on_disconnect.lock().unwrap().take() {
            on_disconnect();
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn initialize(&self) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().initialized += 1;
        Ok(())
    }

    async fn is_enabled(&self) -> Result<bool, DeviceError> {
        Ok(self.enabled)
    }

    async fn request_enable(&self) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().enable_requested += 1;
        Err(DeviceError::BluetoothUnavailable)
    }

    async fn start_scan(&self, on_advertisement: AdvertisementCallback) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().scans_started += 1;
        for advertisement in &self.advertisements {
            on_advertisement(advertisement.clone());
        }
        // a newer scan replaces the listener of an older one
        *self.listener.lock().unwrap() = Some(on_advertisement);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().scans_stopped += 1;
        self.listener.lock().unwrap().take();
        if self.stop_scan_fails {
            return Err(DeviceError::AdapterNotAvailable);
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str, on_disconnect: DisconnectCallback) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().connects.push(device_id.to_string());
        if self.connect_fails {
            return Err(DeviceError::UnknownDevice(device_id.to_string()));
        }
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        *self.on_disconnect.lock().unwrap() = Some(on_disconnect);
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().disconnects.push(device_id.to_string());
        self.on_disconnect.lock().unwrap().take();
        Ok(())
    }

    async fn get_services(&self, _device_id: &str) -> Result<Vec<GattService>, DeviceError> {
        Ok(self.services.clone())
    }

    async fn read(&self, _device_id: &str, _service: Uuid, _characteristic: Uuid) -> Result<Vec<u8>, DeviceError> {
        self.calls.lock().unwrap().reads += 1;
        if let Some(gate) = &self.read_gate {
            gate.notified().await;
        }
        self.payload.clone().map_err(DeviceError::ReadFailure)
    }
}
