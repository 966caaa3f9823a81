//! Radio backend that fabricates sensor traffic for bench and demo setups.

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use hvacvibe_protocol::RadioDevice;

use crate::decode::{SAMPLES_PER_BURST, encode_burst, encode_environment};
use crate::radio::{LinkEvent, Radio, RadioError, RadioFuture};

/// Notification payload size used when splitting bursts.
const CHUNK_LEN: usize = 244;

/// A device the simulator advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub address: String,
    pub name: String,
    pub rssi: i16,
}

impl SimulatedDevice {
    pub fn new(address: impl Into<String>, name: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi,
        }
    }
}

/// Default bench devices.
pub fn default_devices() -> Vec<SimulatedDevice> {
    vec![
        SimulatedDevice::new("AA:BB:CC:DD:EE:01", "HVAC-Vibe-A1", -62),
        SimulatedDevice::new("AA:BB:CC:DD:EE:02", "HVAC-Vibe-B2", -71),
    ]
}

/// Simulated radio.
///
/// Every connected link receives one RSSI, battery, environment and full
/// vibration burst per `period` until the receiver is dropped.
pub struct SimulatedRadio {
    devices: Vec<SimulatedDevice>,
    paired: Mutex<HashSet<String>>,
    period: Duration,
}

impl SimulatedRadio {
    pub fn new(devices: Vec<SimulatedDevice>, period: Duration) -> Self {
        Self {
            devices,
            paired: Mutex::new(HashSet::new()),
            period,
        }
    }

    pub fn is_paired(&self, address: &str) -> bool {
        self.paired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }

    fn device(&self, address: &str) -> Result<(usize, &SimulatedDevice), RadioError> {
        self.devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| RadioError::DeviceNotFound(address.to_string()))
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new(default_devices(), Duration::from_secs(1))
    }
}

impl Radio for SimulatedRadio {
    fn scan(&self, duration: Duration) -> RadioFuture<'_, Vec<RadioDevice>> {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Ok(self
                .devices
                .iter()
                .map(|d| RadioDevice {
                    address: d.address.clone(),
                    name: d.name.clone(),
                    signal: d.rssi,
                    paired: self.is_paired(&d.address),
                })
                .collect())
        })
    }

    fn pair<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ()> {
        Box::pin(async move {
            let (_, dev) = self.device(address)?;
            self.paired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(dev.address.clone());
            Ok(())
        })
    }

    fn unpair<'a>(&'a self, address: &'a str) -> RadioFuture<'a, ()> {
        Box::pin(async move {
            self.paired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(address);
            Ok(())
        })
    }

    fn connect<'a>(&'a self, address: &'a str) -> RadioFuture<'a, mpsc::Receiver<LinkEvent>> {
        Box::pin(async move {
            let (index, dev) = self.device(address)?;
            let (tx, rx) = mpsc::channel(64);
            let signal = SignalModel::new(index as f64 * 2.0, dev.rssi);
            info!(sensor = %dev.address, "simulated link opened");
            tokio::spawn(stream_link(dev.address.clone(), tx, signal, self.period));
            Ok(rx)
        })
    }
}

async fn stream_link(
    address: String,
    tx: mpsc::Sender<LinkEvent>,
    mut signal: SignalModel,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    'link: loop {
        interval.tick().await;
        for ev in signal.tick() {
            if tx.send(ev).await.is_err() {
                break 'link;
            }
        }
    }
    debug!(sensor = %address, "simulated link closed");
}

/// Deterministic slowly varying signal.
struct SignalModel {
    t: f64,
    base_rssi: i16,
}

impl SignalModel {
    fn new(phase: f64, base_rssi: i16) -> Self {
        Self { t: phase, base_rssi }
    }

    fn tick(&mut self) -> Vec<LinkEvent> {
        self.t += 0.04;
        let t = self.t;

        let rms = (0.42 + 0.12 * (t * 1.1).sin() + 0.06 * (t * 3.7).sin()).max(0.01);
        let temp = 24.3 + 0.8 * (t * 0.08).sin();
        let humidity = 52.1 + 1.5 * (t * 0.05).sin();
        let rssi = self.base_rssi + (6.0 * (t * 0.25).sin()).round() as i16;

        let mut events = vec![
            LinkEvent::Rssi(rssi),
            LinkEvent::Battery(78),
            LinkEvent::Environment(encode_environment(temp, humidity, 1013).to_vec()),
        ];
        let burst = encode_burst(&burst_samples(rms));
        events.extend(
            burst
                .chunks(CHUNK_LEN)
                .map(|c| LinkEvent::VibrationChunk(c.to_vec())),
        );
        events
    }
}

/// Samples whose magnitude oscillates around `rms` g, mostly on the z axis.
fn burst_samples(rms: f64) -> Vec<(i16, i16, i16)> {
    let to_lsb = |g: f64| (g / 0.004).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    (0..SAMPLES_PER_BURST)
        .map(|i| {
            let phase = TAU * i as f64 / 32.0;
            let z = rms * (1.0 + 0.25 * phase.sin());
            let x = rms * 0.1 * (phase * 3.0).cos();
            (to_lsb(x), 0, to_lsb(z))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{BurstAssembler, parse_environment};

    #[tokio::test(start_paused = true)]
    async fn scan_lists_devices_with_pair_state() {
        let radio = SimulatedRadio::default();
        radio.pair("AA:BB:CC:DD:EE:02").await.unwrap();

        let devices = radio.scan(Duration::from_secs(5)).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(!devices[0].paired);
        assert!(devices[1].paired);

        radio.unpair("AA:BB:CC:DD:EE:02").await.unwrap();
        assert!(!radio.is_paired("AA:BB:CC:DD:EE:02"));
    }

    #[tokio::test]
    async fn unknown_device_is_rejected() {
        let radio = SimulatedRadio::default();
        assert!(matches!(
            radio.pair("00:00").await,
            Err(RadioError::DeviceNotFound(_))
        ));
        assert!(radio.connect("00:00").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn link_streams_decodable_frames() {
        let radio = SimulatedRadio::default();
        let mut rx = radio.connect("AA:BB:CC:DD:EE:01").await.unwrap();

        let mut asm = BurstAssembler::new();
        let mut stats = None;
        let mut env = None;
        while stats.is_none() {
            match rx.recv().await.unwrap() {
                LinkEvent::VibrationChunk(c) => stats = asm.push(&c),
                LinkEvent::Environment(f) => env = parse_environment(&f),
                _ => {}
            }
        }

        let stats = stats.unwrap();
        assert!(stats.rms > 0.2 && stats.rms < 0.7, "rms {}", stats.rms);
        assert!(stats.peak >= stats.rms);
        let env = env.unwrap();
        assert!((env.temperature - 24.3).abs() < 1.0);
        assert!((env.pressure - 1013.0).abs() < 1e-9);
    }
}
