//! Data model and viewer wire protocol for the HVAC-Vibe gateway.
//!
//! Viewers talk JSON over a persistent WebSocket. Inbound messages are
//! command envelopes (`{"cmd": ...}`), outbound messages are events tagged
//! by `type`.

pub mod backoff;
pub mod constants;
pub mod envelope;
pub mod events;
pub mod types;

pub use backoff::Backoff;
pub use envelope::{ProtocolError, ViewerCommand};
pub use events::{BleScanData, SensorStatus, SensorUpdate, ServerEvent, SystemStatus, WifiScanData};
pub use types::{
    HistoryPoint, NetworkDescriptor, PairedSensor, RadioDevice, SensorReading, WifiStatus,
};
