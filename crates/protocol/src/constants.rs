use std::time::Duration;

/// Time to wait for a pong (or any inbound frame) before a viewer is
/// considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the gateway pings each viewer.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum inbound viewer message size (64 KiB). Commands are tiny.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Number of minute slots in one calendar day.
pub const MINUTES_PER_DAY: u16 = 1440;

/// RMS vibration (g) above which a sensor is in alarm.
pub const DEFAULT_ALARM_THRESHOLD: f64 = 0.60;

/// RMS vibration (g) at or above which a sensor is flagged as warning.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.50;

/// Advertised name prefix of HVAC-Vibe sensors.
pub const DEVICE_NAME_PREFIX: &str = "HVACVIBE";

/// `cmd_ack` status words.
pub mod ack {
    pub const SCANNING: &str = "scanning";
    pub const CONNECTING: &str = "connecting";
    pub const PAIRING: &str = "pairing";
    pub const UNPAIRING: &str = "unpairing";
}
