use uuid::Uuid;

/**
 * How often (milliseconds) the scanner checks whether a device has been latched.
 */
pub const SCAN_POLL_DELAY: u64 = 400;

/**
 * How long (milliseconds) a scan may run before giving up.
 */
pub const SCAN_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) after the most recent successful read the connection is torn down.
 */
pub const AUTO_DISCONNECT_DELAY: u64 = 5 * 60 * 1000;

/**
 * The UUID of the Kestrel weather service
 */
pub const WEATHER_SERVICE_UUID: Uuid = Uuid::from_u128(0x03290000_eab4_dea1_b24e_44ec023874db);

/**
 * The UUID of the characteristic carrying the sensor measurement record.
 */
pub const SENSOR_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x03290310_eab4_dea1_b24e_44ec023874db);

/**
 * Total size of the sensor measurement record, little-endian.
 */
pub const MEASUREMENT_RECORD_LEN: usize = 20;

// byte offsets into the measurement record
pub const OFFSET_WIND_SPEED: usize = 0;
pub const OFFSET_TEMPERATURE: usize = 2;
pub const OFFSET_GLOBE_TEMPERATURE: usize = 4;
pub const OFFSET_HUMIDITY: usize = 6;
pub const OFFSET_PRESSURE: usize = 8;

/**
 * Raw values reserved by the wire format to mean "no valid reading".
 */
pub const UNSIGNED_SENTINEL: u16 = 0xFFFF;
pub const SIGNED_SENTINEL: i16 = 0x8001_u16 as i16;

// raw value / divisor = engineering units
pub const WIND_SPEED_DIVISOR: f64 = 1000.0; // m/s
pub const TEMPERATURE_DIVISOR: f64 = 100.0; // °C
pub const HUMIDITY_DIVISOR: f64 = 100.0; // %
pub const PRESSURE_DIVISOR: f64 = 10.0; // hPa

pub const HPA_TO_INHG: f64 = 0.029529983071445;
pub const MPS_TO_MPH: f64 = 2.23694;

/**
 * Default name heuristic. Advertised names are lower-cased before matching.
 * This is a best-effort guess at "looks like a Kestrel", not an identity check.
 */
pub const DEFAULT_NAME_CONTAINS: [&str; 4] = ["elite", "2998", "kestrel", "5700"];
pub const DEFAULT_NAME_PREFIXES: [&str; 3] = ["elite", "k5", "k7"];

pub const STATUS_NOT_CONNECTED: &str = "Not connected";
pub const STATUS_AUTO_DISCONNECTED: &str = "Auto-disconnected due to inactivity";
pub const STATUS_DEVICE_DISCONNECTED: &str = "Device disconnected";
