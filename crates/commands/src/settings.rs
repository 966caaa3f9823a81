//! Settings saved by the setup viewer.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

/// Errors from settings operations.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file is not a JSON object")]
    NotAnObject,
}

/// Free-form JSON object written by `save_config`.
///
/// Saves merge top-level keys into the stored object; keys the viewer
/// does not send are kept.
pub struct ViewerSettings {
    path: Option<PathBuf>,
    values: RwLock<Map<String, Value>>,
}

impl ViewerSettings {
    /// Opens the settings at `path`, loading the existing object.
    pub fn open(path: PathBuf) -> Result<Self, SettingsError> {
        let values = load_values(&path)?;
        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Settings that are never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(Map::new()),
        }
    }

    pub fn values(&self) -> Map<String, Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merges `update` and persists the result.
    ///
    /// Nothing changes in memory when the write fails.
    pub fn merge(&self, update: Map<String, Value>) -> Result<(), SettingsError> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let mut merged = values.clone();
        merged.extend(update);
        self.persist(&merged)?;
        *values = merged;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(values)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!("persisted viewer settings to {:?}", path);
        Ok(())
    }
}

fn load_values(path: &Path) -> Result<Map<String, Value>, SettingsError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let data = std::fs::read_to_string(path)?;
    match serde_json::from_str(&data)? {
        Value::Object(values) => {
            debug!("loaded {} viewer setting(s) from {:?}", values.len(), path);
            Ok(values)
        }
        _ => Err(SettingsError::NotAnObject),
    }
}
