use async_trait::async_trait;
use uuid::Uuid;

use crate::device::types::{Advertisement, GattService};
use crate::error::DeviceError;

pub type AdvertisementCallback = Box<dyn Fn(Advertisement) + Send + Sync>;
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// The BLE primitives the supervisor needs. Implemented over btleplug in
/// [`crate::device::btle`], and by an in-memory fake in tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn initialize(&self) -> Result<(), DeviceError>;

    async fn is_enabled(&self) -> Result<bool, DeviceError>;

    async fn request_enable(&self) -> Result<(), DeviceError>;

    /// Start a discovery scan. `on_advertisement` may be invoked from any task until
    /// `stop_scan` returns.
    async fn start_scan(&self, on_advertisement: AdvertisementCallback) -> Result<(), DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    /// Connect to a device. `on_disconnect` fires at most once, when the link drops
    /// without a call to `disconnect`.
    async fn connect(&self, device_id: &str, on_disconnect: DisconnectCallback) -> Result<(), DeviceError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), DeviceError>;

    async fn get_services(&self, device_id: &str) -> Result<Vec<GattService>, DeviceError>;

    async fn read(&self, device_id: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, DeviceError>;
}
