//! Owns one producer task per paired sensor plus the discovery unit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hvacvibe_protocol::{PairedSensor, RadioDevice};
use hvacvibe_store::SensorStore;

use crate::producer::{ProducerConfig, run_producer};
use crate::radio::{Radio, RadioError};

struct ProducerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Producer supervisor.
///
/// Each producer runs on a child of the supervisor's cancellation token, so
/// cancelling the parent stops every producer.
pub struct Ingestion {
    radio: Arc<dyn Radio>,
    store: SensorStore,
    config: ProducerConfig,
    device_prefix: String,
    producers: Mutex<HashMap<String, ProducerHandle>>,
    cancel: CancellationToken,
}

impl Ingestion {
    pub fn new(
        radio: Arc<dyn Radio>,
        store: SensorStore,
        config: ProducerConfig,
        device_prefix: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            radio,
            store,
            config,
            device_prefix: device_prefix.into(),
            producers: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn radio(&self) -> &Arc<dyn Radio> {
        &self.radio
    }

    /// Registers the sensor in the store and starts its producer.
    ///
    /// Returns `false` if a producer for this address is already running.
    pub async fn start(&self, sensor: &PairedSensor) -> bool {
        let mut producers = self.producers.lock().await;
        if producers
            .get(&sensor.address)
            .is_some_and(|h| !h.task.is_finished())
        {
            return false;
        }

        self.store.register(&sensor.address, &sensor.name);

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(run_producer(
            Arc::clone(&self.radio),
            self.store.clone(),
            sensor.address.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        producers.insert(sensor.address.clone(), ProducerHandle { cancel, task });
        info!(sensor = %sensor.address, name = %sensor.name, "producer started");
        true
    }

    /// Cancels a producer and waits for it to exit.
    ///
    /// The wait is bounded by the radio call or backoff sleep in progress,
    /// both of which observe cancellation.
    pub async fn stop(&self, address: &str) -> bool {
        let Some(handle) = self.producers.lock().await.remove(address) else {
            return false;
        };
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            debug!(sensor = %address, "producer task ended abnormally: {e}");
        }
        info!(sensor = %address, "producer stopped");
        true
    }

    pub async fn stop_all(&self) {
        let handles: Vec<(String, ProducerHandle)> =
            self.producers.lock().await.drain().collect();
        for (_, h) in &handles {
            h.cancel.cancel();
        }
        for (address, h) in handles {
            if let Err(e) = h.task.await {
                debug!(sensor = %address, "producer task ended abnormally: {e}");
            }
        }
    }

    pub async fn is_running(&self, address: &str) -> bool {
        self.producers
            .lock()
            .await
            .get(address)
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Addresses with a live producer, sorted.
    pub async fn running(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .producers
            .lock()
            .await
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(a, _)| a.clone())
            .collect();
        out.sort();
        out
    }

    /// Ad-hoc scan for sensors, strongest signal first. Does not touch the store.
    pub async fn discover(&self, duration: Duration) -> Result<Vec<RadioDevice>, RadioError> {
        let mut devices: Vec<RadioDevice> = self
            .radio
            .scan(duration)
            .await?
            .into_iter()
            .filter(|d| matches_prefix(&d.name, &self.device_prefix))
            .collect();
        devices.sort_by(|a, b| b.signal.cmp(&a.signal));
        let mut seen = HashSet::new();
        devices.retain(|d| seen.insert(d.address.clone()));
        debug!(found = devices.len(), "discovery scan complete");
        Ok(devices)
    }
}

/// Case-insensitive prefix match ignoring separators, so `HVAC-Vibe-A1`
/// matches the `HVACVIBE` prefix.
pub fn matches_prefix(name: &str, prefix: &str) -> bool {
    fn norm(s: &str) -> String {
        s.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }
    norm(name).starts_with(&norm(prefix))
}
