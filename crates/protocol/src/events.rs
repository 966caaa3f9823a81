use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::{HistoryPoint, NetworkDescriptor, RadioDevice, WifiStatus};

/// Event pushed from the gateway to viewers, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SensorUpdate {
        data: SensorUpdate,
    },
    WifiScanResult {
        data: WifiScanData,
    },
    BleScanResult {
        data: BleScanData,
    },
    SystemStatus {
        data: SystemStatus,
    },
    CmdAck {
        cmd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    CmdResult {
        cmd: String,
        success: bool,
        message: String,
    },
    ToggleView,
}

impl ServerEvent {
    pub fn ack(cmd: &str, status: &str) -> Self {
        ServerEvent::CmdAck {
            cmd: cmd.to_string(),
            status: Some(status.to_string()),
        }
    }

    pub fn result(cmd: &str, success: bool, message: impl Into<String>) -> Self {
        ServerEvent::CmdResult {
            cmd: cmd.to_string(),
            success,
            message: message.into(),
        }
    }

    /// Serializes the event to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Full current state of one sensor: latest values plus day history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdate {
    pub sensor_id: String,
    pub name: String,
    pub vib_rms: f64,
    pub vib_peak: f64,
    pub temp: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub alarm: bool,
    pub warn: bool,
    pub connected: bool,
    pub battery: u8,
    pub rssi: i16,
    pub last_seen: Option<NaiveDateTime>,
    pub history: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiScanData {
    pub networks: Vec<NetworkDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleScanData {
    pub devices: Vec<RadioDevice>,
}

/// Connectivity overview: WiFi link plus every paired sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub wifi: WifiStatus,
    pub sensors: Vec<SensorStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub name: String,
    pub address: String,
    pub paired: bool,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cmd_ack_shape() {
        let json = serde_json::to_value(ServerEvent::ack("wifi_scan", "scanning")).unwrap();
        assert_eq!(
            json,
            json!({"type": "cmd_ack", "cmd": "wifi_scan", "status": "scanning"})
        );
    }

    #[test]
    fn cmd_result_shape() {
        let json =
            serde_json::to_value(ServerEvent::result("wifi_connect", false, "bad password"))
                .unwrap();
        assert_eq!(
            json,
            json!({
                "type": "cmd_result",
                "cmd": "wifi_connect",
                "success": false,
                "message": "bad password"
            })
        );
    }

    #[test]
    fn toggle_view_is_bare_type() {
        assert_eq!(
            ServerEvent::ToggleView.to_json().unwrap(),
            r#"{"type":"toggle_view"}"#
        );
    }

    #[test]
    fn sensor_update_nests_under_data() {
        let ev = ServerEvent::SensorUpdate {
            data: SensorUpdate {
                sensor_id: "AA".into(),
                name: "UNIT-01".into(),
                vib_rms: 0.82,
                vib_peak: 2.1,
                temp: 24.0,
                humidity: 50.0,
                pressure: 1012.0,
                alarm: true,
                warn: true,
                connected: true,
                battery: 80,
                rssi: -60,
                last_seen: None,
                history: vec![HistoryPoint {
                    minute_of_day: 5,
                    vibration_rms: 0.82,
                }],
            },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "sensor_update");
        assert_eq!(json["data"]["alarm"], true);
        assert_eq!(json["data"]["history"], json!([[5, 0.82]]));
    }

    #[test]
    fn system_status_shape() {
        let ev = ServerEvent::SystemStatus {
            data: SystemStatus {
                wifi: WifiStatus {
                    connected: true,
                    ssid: "Home".into(),
                    ip: "192.168.1.20".into(),
                    signal: 70,
                },
                sensors: vec![SensorStatus {
                    name: "UNIT-01".into(),
                    address: "AA".into(),
                    paired: true,
                    connected: false,
                }],
            },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["data"]["wifi"]["ssid"], "Home");
        assert_eq!(json["data"]["sensors"][0]["paired"], true);
    }
}
