//! Viewer command dispatch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hvacvibe_ingest::Ingestion;
use hvacvibe_live_hub::{Handler, HandlerFuture, LiveHub, ViewerSender, sensor_events};
use hvacvibe_protocol::constants::ack;
use hvacvibe_protocol::{
    BleScanData, SensorStatus, ServerEvent, SystemStatus, ViewerCommand, WifiScanData,
};
use hvacvibe_store::SensorStore;

use crate::network::NetworkManager;
use crate::registry::PairingRegistry;
use crate::settings::ViewerSettings;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long `ble_scan` listens for advertisements.
    pub scan_duration: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
        }
    }
}

/// Maps each viewer command to its collaborator.
///
/// Scans, joins and pairing changes are acknowledged with `cmd_ack`, run
/// on their own task, and finish with `cmd_result`. Scan results go to the
/// requesting viewer; outcomes that change shared state (network join,
/// pairing) are broadcast together with a fresh `system_status`.
///
/// Pair and unpair run one at a time, so the registry, the producers and
/// the store always agree about which sensors are paired.
#[derive(Clone)]
pub struct CommandRouter {
    store: SensorStore,
    ingestion: Arc<Ingestion>,
    network: Arc<dyn NetworkManager>,
    registry: Arc<PairingRegistry>,
    hub: Arc<LiveHub>,
    config: RouterConfig,
    settings: Arc<ViewerSettings>,
    pairing: Arc<Mutex<()>>,
}

impl CommandRouter {
    pub fn new(
        store: SensorStore,
        ingestion: Arc<Ingestion>,
        network: Arc<dyn NetworkManager>,
        registry: Arc<PairingRegistry>,
        hub: Arc<LiveHub>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            ingestion,
            network,
            registry,
            hub,
            config,
            settings: Arc::new(ViewerSettings::in_memory()),
            pairing: Arc::new(Mutex::new(())),
        }
    }

    /// Uses `settings` for `save_config` instead of an in-memory object.
    pub fn with_settings(mut self, settings: Arc<ViewerSettings>) -> Self {
        self.settings = settings;
        self
    }

    /// Starts a producer for every registered sensor. Returns how many started.
    pub async fn start_paired(&self) -> usize {
        let mut started = 0;
        for sensor in self.registry.list() {
            if self.ingestion.start(&sensor).await {
                started += 1;
            }
        }
        info!(started, "producers started for paired sensors");
        started
    }

    /// Builds the current `system_status` event.
    pub async fn system_status(&self) -> ServerEvent {
        let wifi = self.network.status().await;
        let sensors = self
            .registry
            .list()
            .into_iter()
            .map(|s| SensorStatus {
                connected: self
                    .store
                    .snapshot(&s.address)
                    .is_some_and(|snap| snap.connected()),
                name: s.name,
                address: s.address,
                paired: s.paired,
            })
            .collect();
        ServerEvent::SystemStatus {
            data: SystemStatus { wifi, sensors },
        }
    }

    async fn broadcast_status(&self) {
        let status = self.system_status().await;
        self.hub.broadcast(&status);
    }

    /// Runs a slow command to completion.
    async fn execute(&self, viewer: ViewerSender, cmd: ViewerCommand) {
        match cmd {
            ViewerCommand::WifiScan => self.wifi_scan(&viewer).await,
            ViewerCommand::WifiConnect { ssid, password } => self.wifi_connect(&ssid, &password).await,
            ViewerCommand::BleScan => self.ble_scan(&viewer).await,
            ViewerCommand::BlePair { address, name } => {
                let _pairing = self.pairing.lock().await;
                self.ble_pair(&address, name).await;
            }
            ViewerCommand::BleUnpair { address } => {
                let _pairing = self.pairing.lock().await;
                self.ble_unpair(&address).await;
            }
            ViewerCommand::GetStatus => {
                let _ = viewer.send_event(&self.system_status().await);
            }
            ViewerCommand::ToggleView => {
                self.hub.broadcast(&ServerEvent::ToggleView);
            }
            ViewerCommand::SaveConfig { data } => self.save_config(&viewer, data),
        }
    }

    fn save_config(&self, viewer: &ViewerSender, data: serde_json::Map<String, serde_json::Value>) {
        let keys = data.len();
        let reply = match self.settings.merge(data) {
            Ok(()) => {
                info!(keys, "viewer settings saved");
                ServerEvent::result("save_config", true, "Saved")
            }
            Err(e) => {
                warn!("could not save viewer settings: {e}");
                ServerEvent::result("save_config", false, "Save failed")
            }
        };
        let _ = viewer.send_event(&reply);
    }

    async fn wifi_scan(&self, viewer: &ViewerSender) {
        let reply = match self.network.scan().await {
            Ok(networks) => {
                let count = networks.len();
                let _ = viewer.send_event(&ServerEvent::WifiScanResult {
                    data: WifiScanData { networks },
                });
                ServerEvent::result("wifi_scan", true, format!("Found {count} networks"))
            }
            Err(e) => ServerEvent::result("wifi_scan", false, e.to_string()),
        };
        let _ = viewer.send_event(&reply);
    }

    async fn wifi_connect(&self, ssid: &str, password: &str) {
        if ssid.trim().is_empty() {
            self.hub
                .broadcast(&ServerEvent::result("wifi_connect", false, "SSID is required"));
            return;
        }
        match self.network.connect(ssid, password).await {
            Ok(message) => {
                info!(%ssid, "wifi connected");
                self.hub
                    .broadcast(&ServerEvent::result("wifi_connect", true, message));
                self.broadcast_status().await;
            }
            Err(e) => {
                self.hub
                    .broadcast(&ServerEvent::result("wifi_connect", false, e.to_string()));
            }
        }
    }

    async fn ble_scan(&self, viewer: &ViewerSender) {
        let reply = match self.ingestion.discover(self.config.scan_duration).await {
            Ok(mut devices) => {
                for d in &mut devices {
                    d.paired = self.registry.contains(&d.address);
                }
                let count = devices.len();
                let _ = viewer.send_event(&ServerEvent::BleScanResult {
                    data: BleScanData { devices },
                });
                ServerEvent::result("ble_scan", true, format!("Found {count} sensors"))
            }
            Err(e) => ServerEvent::result("ble_scan", false, e.to_string()),
        };
        let _ = viewer.send_event(&reply);
    }

    async fn ble_pair(&self, address: &str, name: Option<String>) {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address.to_string());

        if let Err(e) = self.ingestion.radio().pair(address).await {
            warn!(sensor = %address, "pairing failed: {e}");
            self.hub
                .broadcast(&ServerEvent::result("ble_pair", false, e.to_string()));
            return;
        }
        let sensor = match self.registry.pair(address, &name) {
            Ok(sensor) => sensor,
            Err(e) => {
                warn!(sensor = %address, "could not save pairing: {e}");
                self.hub
                    .broadcast(&ServerEvent::result("ble_pair", false, e.to_string()));
                return;
            }
        };

        // A rename of an already-running sensor keeps its producer.
        if !self.ingestion.start(&sensor).await {
            self.store.register(&sensor.address, &sensor.name);
        }
        info!(sensor = %sensor.address, name = %sensor.name, "sensor paired");
        self.hub
            .broadcast(&ServerEvent::result("ble_pair", true, format!("Paired {name}")));
        self.broadcast_status().await;
    }

    async fn ble_unpair(&self, address: &str) {
        let Some(sensor) = self.registry.get(address) else {
            self.hub
                .broadcast(&ServerEvent::result("ble_unpair", false, "Not found"));
            return;
        };

        self.ingestion.stop(&sensor.address).await;
        if let Err(e) = self.ingestion.radio().unpair(&sensor.address).await {
            debug!(sensor = %sensor.address, "radio unpair failed: {e}");
        }
        if let Err(e) = self.registry.unpair(&sensor.address) {
            self.hub
                .broadcast(&ServerEvent::result("ble_unpair", false, e.to_string()));
            return;
        }
        self.store.remove(&sensor.address);

        info!(sensor = %sensor.address, "sensor unpaired");
        self.hub.broadcast(&ServerEvent::result(
            "ble_unpair",
            true,
            format!("Removed {}", sensor.address),
        ));
        self.broadcast_status().await;
    }
}

impl Handler for CommandRouter {
    fn on_viewer_connected(&self, viewer: ViewerSender) -> HandlerFuture<'_> {
        Box::pin(async move {
            let this = self.clone();
            tokio::spawn(async move {
                let _ = viewer.send_event(&this.system_status().await);
                for event in sensor_events(&this.store) {
                    if viewer.send_event(&event).is_err() {
                        break;
                    }
                }
            });
        })
    }

    fn on_command(&self, viewer: ViewerSender, cmd: ViewerCommand) -> HandlerFuture<'_> {
        Box::pin(async move {
            let status = match &cmd {
                ViewerCommand::WifiScan | ViewerCommand::BleScan => Some(ack::SCANNING),
                ViewerCommand::WifiConnect { .. } => Some(ack::CONNECTING),
                ViewerCommand::BlePair { .. } => Some(ack::PAIRING),
                ViewerCommand::BleUnpair { .. } => Some(ack::UNPAIRING),
                ViewerCommand::GetStatus
                | ViewerCommand::ToggleView
                | ViewerCommand::SaveConfig { .. } => None,
            };

            if let ViewerCommand::ToggleView = cmd {
                self.hub.broadcast(&ServerEvent::ToggleView);
                return;
            }
            if let Some(status) = status {
                let _ = viewer.send_event(&ServerEvent::ack(cmd.name(), status));
            }

            let this = self.clone();
            tokio::spawn(async move {
                this.execute(viewer, cmd).await;
            });
        })
    }
}

/// Pushes `system_status` to every viewer each `interval` until cancelled.
pub async fn run_status_loop(router: CommandRouter, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if router.hub.viewer_count() == 0 {
            continue;
        }
        router.broadcast_status().await;
    }
    debug!("status loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    use hvacvibe_ingest::{ProducerConfig, SimulatedDevice, SimulatedRadio};
    use hvacvibe_protocol::{NetworkDescriptor, WifiStatus};

    use super::*;
    use crate::network::{NetworkError, NetworkFuture};

    #[derive(Default)]
    struct FakeNetwork {
        joined: Mutex<Option<String>>,
    }

    impl NetworkManager for FakeNetwork {
        fn scan(&self) -> NetworkFuture<'_, Result<Vec<NetworkDescriptor>, NetworkError>> {
            Box::pin(async {
                Ok(vec![NetworkDescriptor {
                    ssid: "Home".into(),
                    signal: 80,
                    secured: true,
                }])
            })
        }

        fn connect<'a>(
            &'a self,
            ssid: &'a str,
            password: &'a str,
        ) -> NetworkFuture<'a, Result<String, NetworkError>> {
            Box::pin(async move {
                if password == "secret" {
                    *self.joined.lock().unwrap() = Some(ssid.to_string());
                    Ok(format!("Connected to {ssid}"))
                } else {
                    Err(NetworkError::Failed("Secrets were required".into()))
                }
            })
        }

        fn status(&self) -> NetworkFuture<'_, WifiStatus> {
            Box::pin(async move {
                match self.joined.lock().unwrap().clone() {
                    Some(ssid) => WifiStatus {
                        connected: true,
                        ssid,
                        ip: "10.0.0.2".into(),
                        signal: 80,
                    },
                    None => WifiStatus::default(),
                }
            })
        }
    }

    struct Fixture {
        router: CommandRouter,
        hub: Arc<LiveHub>,
        store: SensorStore,
        ingestion: Arc<Ingestion>,
        registry: Arc<PairingRegistry>,
        root: CancellationToken,
    }

    fn fixture() -> Fixture {
        let store = SensorStore::default();
        let root = CancellationToken::new();
        let radio = Arc::new(SimulatedRadio::new(
            vec![
                SimulatedDevice::new("AA:01", "HVAC-Vibe-A1", -60),
                SimulatedDevice::new("AA:02", "HVAC-Vibe-B2", -70),
                SimulatedDevice::new("CC:03", "Headphones", -40),
            ],
            Duration::from_millis(50),
        ));
        let ingestion = Arc::new(Ingestion::new(
            radio,
            store.clone(),
            ProducerConfig::default(),
            "HVACVIBE",
            root.child_token(),
        ));
        let hub = Arc::new(LiveHub::new(64));
        let registry = Arc::new(PairingRegistry::in_memory(Vec::new()));
        let router = CommandRouter::new(
            store.clone(),
            Arc::clone(&ingestion),
            Arc::new(FakeNetwork::default()),
            Arc::clone(&registry),
            Arc::clone(&hub),
            RouterConfig {
                scan_duration: Duration::from_millis(10),
            },
        );
        Fixture {
            router,
            hub,
            store,
            ingestion,
            registry,
            root,
        }
    }

    /// Next event of the given type, skipping others.
    async fn expect_event(rx: &mut mpsc::Receiver<WsMessage>, kind: &str) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let text = match rx.recv().await {
                    Some(WsMessage::Text(text)) => text,
                    Some(_) => continue,
                    None => panic!("viewer queue closed"),
                };
                let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if v["type"] == kind {
                    return v;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {kind} event"))
    }

    #[tokio::test]
    async fn wifi_scan_acks_then_replies_to_requester() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);
        let (_other, mut other_rx) = f.hub.attach(&f.root);

        f.router.on_command(viewer, ViewerCommand::WifiScan).await;

        let ack = expect_event(&mut rx, "cmd_ack").await;
        assert_eq!(ack["status"], "scanning");
        let scan = expect_event(&mut rx, "wifi_scan_result").await;
        assert_eq!(scan["data"]["networks"][0]["ssid"], "Home");
        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["success"], true);
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wifi_connect_success_broadcasts_status() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);
        let (_other, mut other_rx) = f.hub.attach(&f.root);

        f.router
            .on_command(
                viewer,
                ViewerCommand::WifiConnect {
                    ssid: "Home".into(),
                    password: "secret".into(),
                },
            )
            .await;

        assert_eq!(expect_event(&mut rx, "cmd_ack").await["status"], "connecting");
        let result = expect_event(&mut other_rx, "cmd_result").await;
        assert_eq!(result["message"], "Connected to Home");
        let status = expect_event(&mut other_rx, "system_status").await;
        assert_eq!(status["data"]["wifi"]["ssid"], "Home");
        assert_eq!(status["data"]["wifi"]["connected"], true);
    }

    #[tokio::test]
    async fn ble_scan_filters_and_marks_paired() {
        let f = fixture();
        f.registry.pair("AA:02", "B2").unwrap();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        f.router.on_command(viewer, ViewerCommand::BleScan).await;

        let scan = expect_event(&mut rx, "ble_scan_result").await;
        let devices = scan["data"]["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["address"], "AA:01");
        assert_eq!(devices[0]["paired"], false);
        assert_eq!(devices[1]["paired"], true);
        assert_eq!(devices[1]["rssi"], -70);
    }

    #[tokio::test]
    async fn pair_starts_producer_and_unpair_stops_it() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        f.router
            .on_command(
                viewer.clone(),
                ViewerCommand::BlePair {
                    address: "AA:01".into(),
                    name: Some("Rooftop".into()),
                },
            )
            .await;
        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["cmd"], "ble_pair");
        assert_eq!(result["message"], "Paired Rooftop");
        let status = expect_event(&mut rx, "system_status").await;
        assert_eq!(status["data"]["sensors"][0]["name"], "Rooftop");
        assert!(f.ingestion.is_running("AA:01").await);
        assert!(f.store.contains("AA:01"));

        f.router
            .on_command(
                viewer,
                ViewerCommand::BleUnpair {
                    address: "AA:01".into(),
                },
            )
            .await;
        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["cmd"], "ble_unpair");
        assert_eq!(result["success"], true);
        assert!(!f.ingestion.is_running("AA:01").await);
        assert!(!f.store.contains("AA:01"));
        assert!(f.registry.list().is_empty());
    }

    #[tokio::test]
    async fn unpair_waits_for_pair_in_progress() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        let held = f.router.pairing.lock().await;
        f.router
            .on_command(
                viewer.clone(),
                ViewerCommand::BlePair {
                    address: "AA:01".into(),
                    name: None,
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.router
            .on_command(
                viewer,
                ViewerCommand::BleUnpair {
                    address: "AA:01".into(),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.registry.list().is_empty());
        assert!(!f.ingestion.is_running("AA:01").await);
        drop(held);

        let first = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(first["cmd"], "ble_pair");
        assert_eq!(first["success"], true);
        let second = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(second["cmd"], "ble_unpair");
        assert_eq!(second["success"], true);

        assert!(!f.ingestion.is_running("AA:01").await);
        assert!(!f.store.contains("AA:01"));
        assert!(f.registry.list().is_empty());
    }

    #[tokio::test]
    async fn concurrent_pair_and_unpair_stay_consistent() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        for _ in 0..5 {
            f.router
                .on_command(
                    viewer.clone(),
                    ViewerCommand::BlePair {
                        address: "AA:01".into(),
                        name: Some("Rooftop".into()),
                    },
                )
                .await;
            f.router
                .on_command(
                    viewer.clone(),
                    ViewerCommand::BleUnpair {
                        address: "AA:01".into(),
                    },
                )
                .await;
            expect_event(&mut rx, "cmd_result").await;
            expect_event(&mut rx, "cmd_result").await;

            let paired = f.registry.contains("AA:01");
            assert_eq!(f.ingestion.is_running("AA:01").await, paired);
            assert_eq!(f.store.contains("AA:01"), paired);
        }
    }

    #[tokio::test]
    async fn pair_unknown_device_fails() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        f.router
            .on_command(
                viewer,
                ViewerCommand::BlePair {
                    address: "FF:FF".into(),
                    name: None,
                },
            )
            .await;
        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["success"], false);
        assert!(f.registry.list().is_empty());
        assert!(!f.ingestion.is_running("FF:FF").await);
    }

    #[tokio::test]
    async fn unpair_unknown_reports_not_found() {
        let f = fixture();
        let (viewer, mut rx) = f.hub.attach(&f.root);

        f.router
            .on_command(
                viewer,
                ViewerCommand::BleUnpair {
                    address: "00:00".into(),
                },
            )
            .await;
        assert_eq!(expect_event(&mut rx, "cmd_ack").await["status"], "unpairing");
        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["success"], false);
        assert_eq!(result["message"], "Not found");
    }

    #[tokio::test]
    async fn save_config_merges_and_replies_to_requester() {
        let f = fixture();
        let tmp = tempfile::tempdir().unwrap();
        let settings = Arc::new(ViewerSettings::open(tmp.path().join("viewer.json")).unwrap());
        let router = f.router.clone().with_settings(Arc::clone(&settings));
        let (viewer, mut rx) = f.hub.attach(&f.root);
        let (_other, mut other_rx) = f.hub.attach(&f.root);

        let cmd = ViewerCommand::parse(
            r#"{"cmd":"save_config","data":{"alarm_threshold":0.7,"units":"metric"}}"#,
        )
        .unwrap();
        router.on_command(viewer, cmd).await;

        let result = expect_event(&mut rx, "cmd_result").await;
        assert_eq!(result["cmd"], "save_config");
        assert_eq!(result["success"], true);
        assert_eq!(result["message"], "Saved");
        assert_eq!(settings.values()["units"], "metric");
        assert!(other_rx.try_recv().is_err());

        let reopened = ViewerSettings::open(tmp.path().join("viewer.json")).unwrap();
        assert_eq!(reopened.values()["alarm_threshold"], 0.7);
    }

    #[tokio::test]
    async fn toggle_view_is_rebroadcast() {
        let f = fixture();
        let (viewer, _rx) = f.hub.attach(&f.root);
        let (_other, mut other_rx) = f.hub.attach(&f.root);

        f.router.on_command(viewer, ViewerCommand::ToggleView).await;
        expect_event(&mut other_rx, "toggle_view").await;
    }

    #[tokio::test]
    async fn new_viewer_gets_status_and_sensors() {
        let f = fixture();
        f.store.register("AA:01", "Rooftop");
        let (viewer, mut rx) = f.hub.attach(&f.root);

        f.router.on_viewer_connected(viewer).await;

        expect_event(&mut rx, "system_status").await;
        let update = expect_event(&mut rx, "sensor_update").await;
        assert_eq!(update["data"]["name"], "Rooftop");
    }

    #[tokio::test(start_paused = true)]
    async fn status_loop_pushes_periodically() {
        let f = fixture();
        let (_viewer, mut rx) = f.hub.attach(&f.root);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_status_loop(
            f.router.clone(),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        let mut pushed = 0;
        while let Ok(WsMessage::Text(text)) = rx.try_recv() {
            if text.as_str().contains("system_status") {
                pushed += 1;
            }
        }
        assert_eq!(pushed, 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
