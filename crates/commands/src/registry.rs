//! Persistent list of paired sensors.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use hvacvibe_protocol::PairedSensor;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found")]
    NotFound(String),
}

/// Paired sensors, cached in memory and persisted to a JSON file.
///
/// Addresses compare case-insensitively.
pub struct PairingRegistry {
    path: Option<PathBuf>,
    sensors: RwLock<Vec<PairedSensor>>,
}

impl PairingRegistry {
    /// Opens the registry at `path`, loading existing entries.
    pub fn open(path: PathBuf) -> Result<Self, PairingError> {
        let sensors = load_sensors(&path)?;
        Ok(Self {
            path: Some(path),
            sensors: RwLock::new(sensors),
        })
    }

    /// A registry that is never written to disk.
    pub fn in_memory(sensors: Vec<PairedSensor>) -> Self {
        Self {
            path: None,
            sensors: RwLock::new(sensors),
        }
    }

    pub fn list(&self) -> Vec<PairedSensor> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, address: &str) -> Option<PairedSensor> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.address.eq_ignore_ascii_case(address))
            .cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Adds a sensor, or renames it if the address is already present.
    pub fn pair(&self, address: &str, name: &str) -> Result<PairedSensor, PairingError> {
        let sensor = {
            let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
            match sensors
                .iter_mut()
                .find(|s| s.address.eq_ignore_ascii_case(address))
            {
                Some(existing) => {
                    existing.name = name.to_string();
                    existing.paired = true;
                    existing.clone()
                }
                None => {
                    let sensor = PairedSensor {
                        name: name.to_string(),
                        address: address.to_string(),
                        paired: true,
                    };
                    sensors.push(sensor.clone());
                    sensor
                }
            }
        };
        self.persist()?;
        Ok(sensor)
    }

    /// Removes a sensor and returns it.
    pub fn unpair(&self, address: &str) -> Result<PairedSensor, PairingError> {
        let removed = {
            let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
            let idx = sensors
                .iter()
                .position(|s| s.address.eq_ignore_ascii_case(address))
                .ok_or_else(|| PairingError::NotFound(address.to_string()))?;
            sensors.remove(idx)
        };
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> Result<(), PairingError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_string_pretty(&*sensors)?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!("persisted paired sensors to {:?}", path);
        Ok(())
    }
}

fn load_sensors(path: &Path) -> Result<Vec<PairedSensor>, PairingError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    let sensors: Vec<PairedSensor> = serde_json::from_str(&data)?;
    debug!("loaded {} paired sensor(s) from {:?}", sensors.len(), path);
    Ok(sensors)
}
