use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors produced while decoding an inbound viewer message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has neither `cmd` nor a known `type`")]
    MissingCommand,

    #[error("invalid `{cmd}` command: {reason}")]
    Invalid { cmd: String, reason: String },
}

impl ProtocolError {
    /// Command name to echo back in `cmd_result`, if one could be read.
    pub fn cmd(&self) -> &str {
        match self {
            ProtocolError::Invalid { cmd, .. } => cmd,
            _ => "unknown",
        }
    }
}

/// Command envelope sent by a viewer.
///
/// Every command arrives as `{"cmd": "<name>", ...params}` except the view
/// toggle, which the dashboard sends as `{"type": "toggle_view"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ViewerCommand {
    WifiScan,
    WifiConnect {
        ssid: String,
        #[serde(default)]
        password: String,
    },
    BleScan,
    BlePair {
        address: String,
        #[serde(default)]
        name: Option<String>,
    },
    BleUnpair {
        address: String,
    },
    GetStatus,
    ToggleView,
    /// Merges top-level keys into the stored viewer settings.
    SaveConfig {
        #[serde(default)]
        data: Map<String, Value>,
    },
}

impl ViewerCommand {
    /// Decodes a text frame from a viewer.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(cmd) = value.get("cmd") {
            let cmd = cmd.as_str().unwrap_or("unknown").to_string();
            return serde_json::from_value(value).map_err(|e| ProtocolError::Invalid {
                cmd,
                reason: e.to_string(),
            });
        }

        match value.get("type").and_then(Value::as_str) {
            Some("toggle_view") => Ok(ViewerCommand::ToggleView),
            _ => Err(ProtocolError::MissingCommand),
        }
    }

    /// Wire name of the command, echoed in `cmd_ack` / `cmd_result`.
    pub fn name(&self) -> &'static str {
        match self {
            ViewerCommand::WifiScan => "wifi_scan",
            ViewerCommand::WifiConnect { .. } => "wifi_connect",
            ViewerCommand::BleScan => "ble_scan",
            ViewerCommand::BlePair { .. } => "ble_pair",
            ViewerCommand::BleUnpair { .. } => "ble_unpair",
            ViewerCommand::GetStatus => "get_status",
            ViewerCommand::ToggleView => "toggle_view",
            ViewerCommand::SaveConfig { .. } => "save_config",
        }
    }
}
