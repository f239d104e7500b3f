use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{AUTO_DISCONNECT_DELAY, SCAN_DEADLINE, SCAN_POLL_DELAY};
use crate::device::scanner::NameFilter;
use crate::error::DeviceError;

/// Tunables injected into the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub scan_timeout: Duration,
    pub scan_poll_interval: Duration,
    pub auto_disconnect: Duration,
    pub name_filter: NameFilter,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            scan_timeout: Duration::from_millis(SCAN_DEADLINE),
            scan_poll_interval: Duration::from_millis(SCAN_POLL_DELAY),
            auto_disconnect: Duration::from_millis(AUTO_DISCONNECT_DELAY),
            name_filter: NameFilter::default(),
        }
    }
}

/// Why the latest acquisition attempt ended without a usable connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    NoDeviceFound,
    ScanFailure,
    ConnectFailure,
    ServiceDiscoveryFailure,
    ReadFailure,
    MalformedPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Reading,
    Connected,
    Disconnected,
    Failed(FailureKind),
}

impl ConnectionState {
    /// An acquisition is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Scanning
                | ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::Reading
        )
    }

    /// The transport-level connect call completed and no teardown happened since.
    pub fn is_link_up(&self) -> bool {
        matches!(
            self,
            ConnectionState::DiscoveringServices | ConnectionState::Reading | ConnectionState::Connected
        )
    }
}

/// A device seen during a scan that passed the name filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub device_id: String,
    pub name: String,
}

/// One advertisement as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub device_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Clock-face wind direction relative to the shooter, 1 to 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WindClock(u8);

impl WindClock {
    pub fn new(hour: u8) -> Result<Self, DeviceError> {
        if (1..=12).contains(&hour) {
            Ok(WindClock(hour))
        } else {
            Err(DeviceError::InvalidWindClock(hour))
        }
    }

    pub fn hour(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for WindClock {
    type Error = DeviceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        WindClock::new(value)
    }
}

impl From<WindClock> for u8 {
    fn from(value: WindClock) -> Self {
        value.0
    }
}

/// A decoded measurement record. Every field is independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub pressure_in_hg: Option<f64>,
    pub wind_speed_mps: Option<f64>,
    pub wind_speed_mph: Option<f64>,
    pub wind_clock: Option<WindClock>,
}

impl EnvironmentSnapshot {
    pub fn with_wind_clock(mut self, wind_clock: Option<WindClock>) -> Self {
        self.wind_clock = wind_clock;
        self
    }
}

struct Field(Option<f64>, usize);

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{:.*}", self.1, value),
            None => write!(f, "--"),
        }
    }
}

impl fmt::Display for EnvironmentSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} °C, {} % RH, {} hPa ({} inHg), wind {} m/s ({} mph)",
            Field(self.temperature_c, 2),
            Field(self.humidity_percent, 1),
            Field(self.pressure_hpa, 1),
            Field(self.pressure_in_hg, 2),
            Field(self.wind_speed_mps, 1),
            Field(self.wind_speed_mph, 1),
        )?;

        if let Some(clock) = self.wind_clock {
            write!(f, " from {} o'clock", clock.hour())?;
        }
        Ok(())
    }
}
