//! Outbound publisher capability and its variants.
//!
//! [`RemoteSync`](crate::RemoteSync) only sees `Arc<dyn Publisher>`; the
//! concrete variant is chosen once from [`PublisherSettings`].

mod http;
mod mqtt;
mod noop;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use hvacvibe_protocol::SensorReading;

pub use http::{HttpPublisher, HttpSettings};
pub use mqtt::{MqttPublisher, MqttSettings};
pub use noop::NoopPublisher;

/// Resolves to the number of records accepted.
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<usize, PublishError>> + Send + 'a>>;

/// One transport-agnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub sensor_id: String,
    pub sensor_name: String,
    pub ts: NaiveDateTime,
    pub vib_rms: f64,
    pub vib_peak: f64,
    pub temp: f64,
    pub humidity: f64,
    pub battery: u8,
    pub rssi: i16,
}

impl PublishRecord {
    /// Builds a record, rounding vibration to 4 decimals and environment to 2.
    pub fn from_reading(sensor_name: &str, r: &SensorReading) -> Self {
        Self {
            sensor_id: r.sensor_id.clone(),
            sensor_name: sensor_name.to_string(),
            ts: r.timestamp,
            vib_rms: round_to(r.vibration_rms, 4),
            vib_peak: round_to(r.vibration_peak, 4),
            temp: round_to(r.temperature, 2),
            humidity: round_to(r.humidity, 2),
            battery: r.battery_pct,
            rssi: r.signal_strength,
        }
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("MQTT not connected")]
    NotConnected,

    #[error("only {sent}/{total} published")]
    Partial { sent: usize, total: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("publisher misconfigured: {0}")]
    Config(String),
}

/// Remote sink for reading batches.
///
/// Implementations must be safe to retry with the same batch.
pub trait Publisher: Send + Sync + 'static {
    /// Short transport name for logs and status.
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, batch: &'a [PublishRecord]) -> PublishFuture<'a>;
}

/// Publisher selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublisherSettings {
    Http(HttpSettings),
    Mqtt(MqttSettings),
    Noop,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        PublisherSettings::Http(HttpSettings::default())
    }
}

/// Builds the configured publisher.
///
/// The MQTT variant spawns its event loop on the current runtime; `cancel`
/// stops it.
pub fn from_settings(
    settings: &PublisherSettings,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Publisher>, PublishError> {
    Ok(match settings {
        PublisherSettings::Http(s) => Arc::new(HttpPublisher::new(s)?),
        PublisherSettings::Mqtt(s) => Arc::new(MqttPublisher::connect(s, cancel.child_token())),
        PublisherSettings::Noop => Arc::new(NoopPublisher::new()),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn record_rounds_values() {
        let r = SensorReading {
            sensor_id: "AA".into(),
            timestamp: NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            vibration_rms: 0.123456,
            vibration_peak: 0.98766,
            temperature: 24.3456,
            humidity: 52.104,
            pressure: 1013.0,
            alarm: false,
            warn: false,
            battery_pct: 77,
            signal_strength: -64,
            connected: true,
        };
        let rec = PublishRecord::from_reading("UNIT-01", &r);
        assert_eq!(rec.vib_rms, 0.1235);
        assert_eq!(rec.vib_peak, 0.9877);
        assert_eq!(rec.temp, 24.35);
        assert_eq!(rec.humidity, 52.1);

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["ts"], "2025-06-01T10:30:00");
        assert_eq!(json["sensor_name"], "UNIT-01");
    }

    #[test]
    fn settings_are_tagged_by_kind() {
        let s: PublisherSettings = serde_json::from_str(r#"{"kind":"noop"}"#).unwrap();
        assert_eq!(s, PublisherSettings::Noop);

        let s: PublisherSettings =
            serde_json::from_str(r#"{"kind":"mqtt","host":"broker.local"}"#).unwrap();
        match s {
            PublisherSettings::Mqtt(m) => {
                assert_eq!(m.host, "broker.local");
                assert_eq!(m.port, 1883);
            }
            other => panic!("expected mqtt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn factory_builds_each_variant() {
        let cancel = CancellationToken::new();
        let http = from_settings(&PublisherSettings::default(), &cancel).unwrap();
        assert_eq!(http.name(), "http");

        let noop = from_settings(&PublisherSettings::Noop, &cancel).unwrap();
        assert_eq!(noop.name(), "noop");

        let mqtt = from_settings(&PublisherSettings::Mqtt(MqttSettings::default()), &cancel).unwrap();
        assert_eq!(mqtt.name(), "mqtt");
        cancel.cancel();
    }
}
