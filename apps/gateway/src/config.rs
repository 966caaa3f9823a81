//! Gateway configuration management.
//!
//! Configuration is stored as TOML at `$HVACVIBE_CONFIG`, falling back to
//! `~/.config/hvacvibe/gateway.toml`. A default file is written on first
//! start. Every field has a default, so partial files are accepted.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hvacvibe_commands::{Nmcli, RouterConfig};
use hvacvibe_ingest::{ProducerConfig, SimulatedDevice};
use hvacvibe_live_hub::{DEFAULT_VIEWER_QUEUE, ServerConfig};
use hvacvibe_protocol::Backoff;
use hvacvibe_protocol::constants::DEVICE_NAME_PREFIX;
use hvacvibe_store::StoreConfig;
use hvacvibe_sync::{PublisherSettings, SyncConfig};

/// Overrides the config file location.
const CONFIG_ENV: &str = "HVACVIBE_CONFIG";
/// Overrides `publisher.api_key` for the HTTP publisher when non-empty.
const API_KEY_ENV: &str = "HVACVIBE_API_KEY";

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub pairing: PairingSection,
    #[serde(default)]
    pub settings: SettingsSection,
    #[serde(default)]
    pub status: StatusSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Viewer WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// 0 = OS-assigned.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outbound messages buffered per viewer before it is dropped.
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8765
}

fn default_viewer_queue() -> usize {
    DEFAULT_VIEWER_QUEUE
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            viewer_queue: default_viewer_queue(),
        }
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_alarm_threshold")]
    pub alarm_threshold: f64,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
    #[serde(default = "default_bucket_minutes")]
    pub history_bucket_minutes: u16,
}

fn default_alarm_threshold() -> f64 {
    0.60
}

fn default_warn_threshold() -> f64 {
    0.50
}

fn default_bucket_minutes() -> u16 {
    1
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            alarm_threshold: default_alarm_threshold(),
            warn_threshold: default_warn_threshold(),
            history_bucket_minutes: default_bucket_minutes(),
        }
    }
}

impl StoreSection {
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            alarm_threshold: self.alarm_threshold,
            warn_threshold: self.warn_threshold,
            history_bucket_minutes: self.history_bucket_minutes.max(1),
        }
    }
}

/// Radio backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    #[default]
    Simulated,
}

/// A device advertised by the simulated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    pub name: String,
    #[serde(default = "default_rssi")]
    pub rssi: i16,
}

fn default_rssi() -> i16 {
    -65
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSection {
    #[serde(default)]
    pub backend: RadioBackend,
    /// Advertised-name prefix accepted by `ble_scan`.
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,
    #[serde(default = "default_scan_duration")]
    pub scan_duration_secs: u64,
    /// A link silent this long is treated as lost.
    #[serde(default = "default_link_timeout")]
    pub link_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
    /// Interval between simulated frames.
    #[serde(default = "default_sample_period")]
    pub sample_period_ms: u64,
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceEntry>,
}

fn default_device_prefix() -> String {
    DEVICE_NAME_PREFIX.into()
}

fn default_scan_duration() -> u64 {
    5
}

fn default_link_timeout() -> u64 {
    15
}

fn default_reconnect_initial() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    60
}

fn default_sample_period() -> u64 {
    1000
}

fn default_devices() -> Vec<DeviceEntry> {
    hvacvibe_ingest::simulated::default_devices()
        .into_iter()
        .map(|d| DeviceEntry {
            address: d.address,
            name: d.name,
            rssi: d.rssi,
        })
        .collect()
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            backend: RadioBackend::default(),
            device_prefix: default_device_prefix(),
            scan_duration_secs: default_scan_duration(),
            link_timeout_secs: default_link_timeout(),
            reconnect_initial_secs: default_reconnect_initial(),
            reconnect_max_secs: default_reconnect_max(),
            sample_period_ms: default_sample_period(),
            devices: default_devices(),
        }
    }
}

impl RadioSection {
    pub fn to_producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            link_timeout: Duration::from_secs(self.link_timeout_secs.max(1)),
            reconnect: Backoff::new(
                Duration::from_secs(self.reconnect_initial_secs.max(1)),
                Duration::from_secs(self.reconnect_max_secs.max(self.reconnect_initial_secs)),
            ),
        }
    }

    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            scan_duration: Duration::from_secs(self.scan_duration_secs.max(1)),
        }
    }

    pub fn simulated_devices(&self) -> Vec<SimulatedDevice> {
        self.devices
            .iter()
            .map(|d| SimulatedDevice::new(d.address.clone(), d.name.clone(), d.rssi))
            .collect()
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_retry_initial")]
    pub retry_initial_secs: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    500
}

fn default_max_pending() -> usize {
    10_000
}

fn default_retry_initial() -> u64 {
    5
}

fn default_retry_max() -> u64 {
    300
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_sync_interval(),
            batch_size: default_batch_size(),
            max_pending: default_max_pending(),
            retry_initial_secs: default_retry_initial(),
            retry_max_secs: default_retry_max(),
        }
    }
}

impl SyncSection {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_secs.max(1)),
            batch_size: self.batch_size.max(1),
            max_pending: self.max_pending.max(1),
            retry: Backoff::new(
                Duration::from_secs(self.retry_initial_secs.max(1)),
                Duration::from_secs(self.retry_max_secs.max(self.retry_initial_secs)),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl NetworkSection {
    pub fn to_nmcli(&self) -> Nmcli {
        Nmcli {
            command_timeout: Duration::from_secs(self.command_timeout_secs.max(1)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            ..Nmcli::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSection {
    /// JSON file holding the paired sensors.
    #[serde(default = "default_pairing_path")]
    pub path: PathBuf,
}

fn default_pairing_path() -> PathBuf {
    config_dir().join("paired_sensors.json")
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            path: default_pairing_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSection {
    /// JSON object written by the setup viewer's `save_config`.
    #[serde(default = "default_settings_path")]
    pub path: PathBuf,
}

fn default_settings_path() -> PathBuf {
    config_dir().join("viewer_settings.json")
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSection {
    /// `system_status` push interval.
    #[serde(default = "default_status_interval")]
    pub interval_secs: u64,
}

fn default_status_interval() -> u64 {
    10
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            interval_secs: default_status_interval(),
        }
    }
}

impl StatusSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    ///
    /// `HVACVIBE_API_KEY` is applied after loading and never written back.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`, readable by the owner only.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_api_key(&mut self, key: Option<String>) {
        let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
            return;
        };
        if let PublisherSettings::Http(http) = &mut self.publisher {
            http.api_key = key;
        }
    }
}

fn config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("hvacvibe")
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join("gateway.toml"),
    }
}
