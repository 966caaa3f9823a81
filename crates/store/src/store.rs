use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::broadcast;

use hvacvibe_protocol::constants::{DEFAULT_ALARM_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use hvacvibe_protocol::{HistoryPoint, SensorReading, SensorUpdate};

use crate::history::DayHistory;

/// Capacity of the change-notification channel.
const EVENT_CAPACITY: usize = 256;

/// Thresholds and history granularity used by the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `alarm` is set when `vibration_rms` exceeds this value (g).
    pub alarm_threshold: f64,
    /// `warn` is set when `vibration_rms` reaches this value (g).
    pub warn_threshold: f64,
    pub history_bucket_minutes: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alarm_threshold: DEFAULT_ALARM_THRESHOLD,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            history_bucket_minutes: 1,
        }
    }
}

/// What happened to a sensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Registered,
    Updated,
    Disconnected,
    Removed,
}

/// Notification emitted after every store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub sensor_id: String,
    pub kind: ChangeKind,
}

/// Immutable copy of one sensor's state.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub sensor_id: String,
    pub name: String,
    pub latest: Option<SensorReading>,
    pub history: Vec<HistoryPoint>,
}

impl SensorSnapshot {
    pub fn connected(&self) -> bool {
        self.latest.as_ref().is_some_and(|r| r.connected)
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.latest.as_ref().map(|r| r.timestamp)
    }

    /// Converts the snapshot into the viewer `sensor_update` payload.
    ///
    /// A sensor that never reported is rendered with zeroed values and
    /// `connected: false`.
    pub fn to_update(&self) -> SensorUpdate {
        let r = self.latest.as_ref();
        SensorUpdate {
            sensor_id: self.sensor_id.clone(),
            name: self.name.clone(),
            vib_rms: r.map_or(0.0, |r| r.vibration_rms),
            vib_peak: r.map_or(0.0, |r| r.vibration_peak),
            temp: r.map_or(0.0, |r| r.temperature),
            humidity: r.map_or(0.0, |r| r.humidity),
            pressure: r.map_or(0.0, |r| r.pressure),
            alarm: r.is_some_and(|r| r.alarm),
            warn: r.is_some_and(|r| r.warn),
            connected: r.is_some_and(|r| r.connected),
            battery: r.map_or(0, |r| r.battery_pct),
            rssi: r.map_or(0, |r| r.signal_strength),
            last_seen: r.map(|r| r.timestamp),
            history: self.history.clone(),
        }
    }
}

#[derive(Debug)]
struct SensorRecord {
    name: String,
    latest: Option<SensorReading>,
    history: DayHistory,
}

/// In-memory registry of per-sensor live readings and day history.
///
/// Each sensor record sits behind its own lock inside a sharded map, so a
/// write to one sensor never waits on another. Latest value and history are
/// updated under the same write guard; readers always see both from the same
/// write. Cloning is cheap and every clone shares the same records.
#[derive(Clone)]
pub struct SensorStore {
    sensors: Arc<DashMap<String, Arc<RwLock<SensorRecord>>>>,
    config: Arc<StoreConfig>,
    events: broadcast::Sender<StoreEvent>,
}

impl SensorStore {
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sensors: Arc::new(DashMap::new()),
            config: Arc::new(config),
            events,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribes to change notifications.
    ///
    /// Events carry only the sensor id; take a [`snapshot`](Self::snapshot)
    /// to read the state.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Adds a sensor with no readings yet, or renames an existing one.
    pub fn register(&self, sensor_id: &str, name: &str) {
        let record = self.record_or_insert(sensor_id, name);
        let mut rec = record.write().unwrap_or_else(PoisonError::into_inner);
        rec.name = name.to_string();
        drop(rec);
        self.emit(sensor_id, ChangeKind::Registered);
    }

    /// Replaces the latest reading and records the history point for its minute.
    ///
    /// `alarm` and `warn` are derived from `vibration_rms`; whatever the
    /// caller set is overwritten. Unknown sensors are registered on first
    /// write with their id as the display name. Returns the stored reading.
    pub fn upsert(&self, sensor_id: &str, mut reading: SensorReading) -> SensorReading {
        reading.sensor_id = sensor_id.to_string();
        reading.alarm = reading.vibration_rms > self.config.alarm_threshold;
        reading.warn = reading.vibration_rms >= self.config.warn_threshold;

        let record = self.record_or_insert(sensor_id, sensor_id);
        {
            let mut rec = record.write().unwrap_or_else(PoisonError::into_inner);
            rec.history.record(reading.timestamp, reading.vibration_rms);
            rec.latest = Some(reading.clone());
        }

        tracing::trace!(
            sensor = %sensor_id,
            rms = reading.vibration_rms,
            alarm = reading.alarm,
            "reading stored"
        );
        self.emit(sensor_id, ChangeKind::Updated);
        reading
    }

    /// Sets `connected = false` on the latest reading, leaving everything else.
    ///
    /// Returns `false` if the sensor is unknown or has never reported.
    pub fn mark_disconnected(&self, sensor_id: &str) -> bool {
        let Some(record) = self.record(sensor_id) else {
            return false;
        };
        let changed = {
            let mut rec = record.write().unwrap_or_else(PoisonError::into_inner);
            match rec.latest.as_mut() {
                Some(latest) if latest.connected => {
                    latest.connected = false;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.emit(sensor_id, ChangeKind::Disconnected);
        }
        changed
    }

    /// Drops a sensor and its history.
    pub fn remove(&self, sensor_id: &str) -> bool {
        let removed = self.sensors.remove(sensor_id).is_some();
        if removed {
            self.emit(sensor_id, ChangeKind::Removed);
        }
        removed
    }

    pub fn snapshot(&self, sensor_id: &str) -> Option<SensorSnapshot> {
        let record = self.record(sensor_id)?;
        let rec = record.read().unwrap_or_else(PoisonError::into_inner);
        Some(SensorSnapshot {
            sensor_id: sensor_id.to_string(),
            name: rec.name.clone(),
            latest: rec.latest.clone(),
            history: rec.history.points(),
        })
    }

    /// Snapshots every sensor, sorted by id.
    ///
    /// Each sensor is read consistently; the set as a whole is not a single
    /// point-in-time cut.
    pub fn snapshot_all(&self) -> Vec<SensorSnapshot> {
        let mut out: Vec<SensorSnapshot> = self
            .sensor_ids()
            .iter()
            .filter_map(|id| self.snapshot(id))
            .collect();
        out.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        out
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.sensors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.sensors.contains_key(sensor_id)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    // Clones the Arc out so the shard guard is released before the record lock is taken.
    fn record(&self, sensor_id: &str) -> Option<Arc<RwLock<SensorRecord>>> {
        self.sensors.get(sensor_id).map(|e| Arc::clone(e.value()))
    }

    fn record_or_insert(&self, sensor_id: &str, name: &str) -> Arc<RwLock<SensorRecord>> {
        let bucket = self.config.history_bucket_minutes;
        let entry = self
            .sensors
            .entry(sensor_id.to_string())
            .or_insert_with(|| {
                tracing::info!(sensor = %sensor_id, "sensor registered in store");
                Arc::new(RwLock::new(SensorRecord {
                    name: name.to_string(),
                    latest: None,
                    history: DayHistory::new(bucket),
                }))
            });
        Arc::clone(entry.value())
    }

    fn emit(&self, sensor_id: &str, kind: ChangeKind) {
        // No subscribers is not an error.
        let _ = self.events.send(StoreEvent {
            sensor_id: sensor_id.to_string(),
            kind,
        });
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
