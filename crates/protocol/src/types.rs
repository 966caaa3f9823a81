use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Latest decoded telemetry sample for one sensor.
///
/// `alarm` and `warn` are derived by the store from `vibration_rms`;
/// producers may leave them `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Local wall-clock time the sample was decoded.
    pub timestamp: NaiveDateTime,
    /// RMS acceleration magnitude in g.
    pub vibration_rms: f64,
    /// Peak acceleration magnitude in g.
    pub vibration_peak: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Barometric pressure, hPa.
    #[serde(default)]
    pub pressure: f64,
    pub alarm: bool,
    #[serde(default)]
    pub warn: bool,
    /// Battery level, 0-100.
    pub battery_pct: u8,
    /// Received signal strength in dBm.
    pub signal_strength: i16,
    /// `true` while the producer holds a live radio link.
    pub connected: bool,
}

impl SensorReading {
    /// Minute of the local day (0..1439) this reading falls into.
    pub fn minute_of_day(&self) -> u16 {
        (self.timestamp.hour() * 60 + self.timestamp.minute()) as u16
    }
}

/// One minute-granularity history sample.
///
/// Serialized as a `[minute, rms]` pair, the shape chart clients expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(u16, f64)", into = "(u16, f64)")]
pub struct HistoryPoint {
    pub minute_of_day: u16,
    pub vibration_rms: f64,
}

impl From<(u16, f64)> for HistoryPoint {
    fn from((minute_of_day, vibration_rms): (u16, f64)) -> Self {
        Self {
            minute_of_day,
            vibration_rms,
        }
    }
}

impl From<HistoryPoint> for (u16, f64) {
    fn from(p: HistoryPoint) -> Self {
        (p.minute_of_day, p.vibration_rms)
    }
}

/// A WiFi network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub ssid: String,
    /// Signal quality, 0-100.
    pub signal: u8,
    pub secured: bool,
}

/// A radio device found by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioDevice {
    pub address: String,
    pub name: String,
    /// Signal strength in dBm.
    #[serde(rename = "rssi")]
    pub signal: i16,
    pub paired: bool,
}

/// Current WiFi link state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiStatus {
    pub connected: bool,
    pub ssid: String,
    pub ip: String,
    pub signal: u8,
}

/// A sensor the user has paired with the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedSensor {
    pub name: String,
    pub address: String,
    #[serde(default = "default_true")]
    pub paired: bool,
}

fn default_true() -> bool {
    true
}
