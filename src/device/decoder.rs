//! Decoder for the Kestrel sensor measurement record.
//!
//! Layout (little-endian, 20 bytes):
//!
//! | offset | type | unit          | field                       |
//! |--------|------|---------------|-----------------------------|
//! | 0      | u16  | 0.001 m/s     | wind speed                  |
//! | 2      | i16  | 0.01 °C       | temperature                 |
//! | 4      | i16  | 0.01 °C       | globe temperature (ignored) |
//! | 6      | u16  | 0.01 %        | relative humidity           |
//! | 8      | u16  | 0.1 hPa       | station pressure            |
//! | 10..20 |      |               | unused                      |
//!
//! A field holding its sentinel (`0xFFFF` unsigned, `0x8001` signed) decodes to `None`.

use crate::device::constants::{
    HPA_TO_INHG, HUMIDITY_DIVISOR, MEASUREMENT_RECORD_LEN, MPS_TO_MPH, OFFSET_GLOBE_TEMPERATURE,
    OFFSET_HUMIDITY, OFFSET_PRESSURE, OFFSET_TEMPERATURE, OFFSET_WIND_SPEED, PRESSURE_DIVISOR,
    SIGNED_SENTINEL, TEMPERATURE_DIVISOR, UNSIGNED_SENTINEL, WIND_SPEED_DIVISOR,
};
use crate::device::types::EnvironmentSnapshot;
use crate::error::DeviceError;

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn unsigned_field(bytes: &[u8], offset: usize, divisor: f64) -> Option<f64> {
    let raw = read_u16(bytes, offset);
    if raw == UNSIGNED_SENTINEL {
        return None;
    }
    Some(f64::from(raw) / divisor)
}

fn signed_field(bytes: &[u8], offset: usize, divisor: f64) -> Option<f64> {
    let raw = read_i16(bytes, offset);
    if raw == SIGNED_SENTINEL {
        return None;
    }
    Some(f64::from(raw) / divisor)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Decode one measurement record. Only a buffer of the wrong length is an error.
pub fn decode(bytes: &[u8]) -> Result<EnvironmentSnapshot, DeviceError> {
    if bytes.len() != MEASUREMENT_RECORD_LEN {
        return Err(DeviceError::MalformedPayload { len: bytes.len(), expected: MEASUREMENT_RECORD_LEN });
    }

    let wind_speed_mps = unsigned_field(bytes, OFFSET_WIND_SPEED, WIND_SPEED_DIVISOR);
    let temperature_c = signed_field(bytes, OFFSET_TEMPERATURE, TEMPERATURE_DIVISOR);
    // parsed so that a bad record shows up in the debug log, the app has no use for it
    let globe_temperature_c = signed_field(bytes, OFFSET_GLOBE_TEMPERATURE, TEMPERATURE_DIVISOR);
    let humidity_percent = unsigned_field(bytes, OFFSET_HUMIDITY, HUMIDITY_DIVISOR);
    let pressure_hpa = unsigned_field(bytes, OFFSET_PRESSURE, PRESSURE_DIVISOR);

    log::debug!(
        "Decoded record: wind={:?} temp={:?} globe={:?} humidity={:?} pressure={:?}",
        wind_speed_mps, temperature_c, globe_temperature_c, humidity_percent, pressure_hpa
    );

    Ok(EnvironmentSnapshot {
        temperature_c,
        humidity_percent,
        pressure_hpa,
        pressure_in_hg: pressure_hpa.map(|hpa| round_to(hpa * HPA_TO_INHG, 2)),
        wind_speed_mps,
        wind_speed_mph: wind_speed_mps.map(|mps| round_to(mps * MPS_TO_MPH, 1)),
        wind_clock: None,
    })
}
