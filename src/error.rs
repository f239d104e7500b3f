use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to encode weather snapshot: {source}")]
    Output { #[from] source: serde_json::Error },

    #[error("Failed to run acquisition: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Acquisition did not produce weather data: {message}")]
    NoData { message: String },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    AdapterNotAvailable,

    #[error("Bluetooth is disabled and could not be enabled")]
    BluetoothUnavailable,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("No Kestrel device found")]
    NoDeviceFound,

    #[error("Weather service not found on device")]
    ServiceNotFound,

    #[error("Sensor measurement characteristic not found on device")]
    CharacteristicNotFound,

    #[error("Failed to read sensor measurement: {0}")]
    ReadFailure(String),

    #[error("Malformed measurement record: expected {expected} bytes, got {len}")]
    MalformedPayload { len: usize, expected: usize },

    #[error("Wind clock must be between 1 and 12, got {0}")]
    InvalidWindClock(u8),
}
