//! Per-sensor ingestion loop: connect, decode, upsert, reconnect with backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hvacvibe_protocol::{Backoff, SensorReading};
use hvacvibe_store::SensorStore;

use crate::decode::{BurstAssembler, VibrationStats, parse_environment};
use crate::radio::{LinkEvent, Radio};

/// Producer tuning.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// A link silent for this long is treated as lost.
    pub link_timeout: Duration,
    pub reconnect: Backoff,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            link_timeout: Duration::from_secs(15),
            reconnect: Backoff::default(),
        }
    }
}

/// Decoding state for one live link.
struct LinkSession {
    assembler: BurstAssembler,
    vibration: VibrationStats,
    temperature: f64,
    humidity: f64,
    pressure: f64,
    battery: u8,
    rssi: i16,
}

impl LinkSession {
    fn new() -> Self {
        Self {
            assembler: BurstAssembler::new(),
            vibration: VibrationStats::default(),
            temperature: 0.0,
            humidity: 0.0,
            pressure: 0.0,
            battery: 0,
            rssi: -99,
        }
    }

    /// Starts a session from the sensor's last stored values, so frames
    /// arriving before the link's first full burst keep the known vibration.
    fn resume(previous: Option<&SensorReading>) -> Self {
        let mut session = Self::new();
        if let Some(p) = previous {
            session.vibration = VibrationStats {
                rms: p.vibration_rms,
                peak: p.vibration_peak,
            };
            session.temperature = p.temperature;
            session.humidity = p.humidity;
            session.pressure = p.pressure;
            session.battery = p.battery_pct;
            session.rssi = p.signal_strength;
        }
        session
    }

    /// Folds an event into the session. Returns a reading when the event
    /// completes a burst or carries an environment frame.
    fn apply(&mut self, sensor_id: &str, event: LinkEvent) -> Option<SensorReading> {
        match event {
            LinkEvent::VibrationChunk(chunk) => {
                self.vibration = self.assembler.push(&chunk)?;
            }
            LinkEvent::Environment(frame) => {
                let env = parse_environment(&frame)?;
                self.temperature = env.temperature;
                self.humidity = env.humidity;
                self.pressure = env.pressure;
            }
            LinkEvent::Battery(pct) => {
                self.battery = pct.min(100);
                return None;
            }
            LinkEvent::Rssi(dbm) => {
                self.rssi = dbm;
                return None;
            }
        }
        Some(self.reading(sensor_id))
    }

    fn reading(&self, sensor_id: &str) -> SensorReading {
        SensorReading {
            sensor_id: sensor_id.to_string(),
            timestamp: chrono::Local::now().naive_local(),
            vibration_rms: self.vibration.rms,
            vibration_peak: self.vibration.peak,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            alarm: false,
            warn: false,
            battery_pct: self.battery,
            signal_strength: self.rssi,
            connected: true,
        }
    }
}

/// How a link session ended.
enum LinkEnd {
    Cancelled,
    Lost { delivered: bool },
}

/// Runs one sensor's producer until `cancel` fires.
///
/// Link loss marks the sensor disconnected and schedules a reconnect after
/// `config.reconnect.delay_for_attempt(n)`. The attempt counter resets once a
/// link delivers data, so a link that connects but never reports keeps
/// backing off.
pub(crate) async fn run_producer(
    radio: Arc<dyn Radio>,
    store: SensorStore,
    address: String,
    config: ProducerConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let link = tokio::select! {
            _ = cancel.cancelled() => break,
            link = radio.connect(&address) => link,
        };

        match link {
            Ok(rx) => {
                info!(sensor = %address, "sensor link up");
                match pump_link(&store, &address, rx, config.link_timeout, &cancel).await {
                    LinkEnd::Cancelled => break,
                    LinkEnd::Lost { delivered } => {
                        store.mark_disconnected(&address);
                        if delivered {
                            attempt = 0;
                        }
                        warn!(sensor = %address, "sensor link lost");
                    }
                }
            }
            Err(e) => {
                store.mark_disconnected(&address);
                warn!(sensor = %address, "sensor connect failed: {e}");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = config.reconnect.delay_for_attempt(attempt);
        info!(
            sensor = %address,
            attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    store.mark_disconnected(&address);
    debug!(sensor = %address, "producer stopped");
}

async fn pump_link(
    store: &SensorStore,
    address: &str,
    mut rx: tokio::sync::mpsc::Receiver<LinkEvent>,
    link_timeout: Duration,
    cancel: &CancellationToken,
) -> LinkEnd {
    let previous = store.snapshot(address).and_then(|snap| snap.latest);
    let mut session = LinkSession::resume(previous.as_ref());
    let mut delivered = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return LinkEnd::Cancelled,
            ev = tokio::time::timeout(link_timeout, rx.recv()) => ev,
        };

        match event {
            Ok(Some(ev)) => {
                if let Some(reading) = session.apply(address, ev) {
                    store.upsert(address, reading);
                    delivered = true;
                }
            }
            Ok(None) => return LinkEnd::Lost { delivered },
            Err(_) => {
                debug!(sensor = %address, "no data within link timeout");
                return LinkEnd::Lost { delivered };
            }
        }
    }
}
