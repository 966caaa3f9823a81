use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PublishError, PublishFuture, PublishRecord, Publisher};

/// Delay before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Requests buffered between the client and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// Upper bound on handing one batch to the event loop.
const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    1883
}

fn default_topic_format() -> String {
    "hvacvibe/{sensor_id}/data".into()
}

fn default_qos() -> u8 {
    1
}

fn default_client_id() -> String {
    "hvacvibe-gateway".into()
}

/// MQTT publisher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Topic template; `{sensor_id}` is substituted per record.
    #[serde(default = "default_topic_format")]
    pub topic_format: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            topic_format: default_topic_format(),
            qos: default_qos(),
            client_id: default_client_id(),
        }
    }
}

impl MqttSettings {
    pub fn topic_for(&self, sensor_id: &str) -> String {
        self.topic_format.replace("{sensor_id}", sensor_id)
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }
}

/// Publishes one message per record to a per-sensor topic.
///
/// A batch succeeds only if the broker session is up and every record was
/// queued on the client.
pub struct MqttPublisher {
    client: AsyncClient,
    settings: MqttSettings,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Creates the client and spawns its event loop until `cancel` fires.
    pub fn connect(settings: &MqttSettings, cancel: CancellationToken) -> Self {
        let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        opts.set_keep_alive(Duration::from_secs(60));
        if !settings.username.is_empty() {
            opts.set_credentials(&settings.username, &settings.password);
        }

        let (client, event_loop) = AsyncClient::new(opts, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        tokio::spawn(drive_event_loop(event_loop, Arc::clone(&connected), cancel));
        info!(host = %settings.host, port = settings.port, "MQTT publisher connecting");

        Self {
            client,
            settings: settings.clone(),
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = event_loop.poll() => ev,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                connected.store(true, Ordering::Relaxed);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker disconnected");
                connected.store(false, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {e}");
                } else {
                    debug!("MQTT connect failed: {e}");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    debug!("MQTT event loop stopped");
}

impl Publisher for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send<'a>(&'a self, batch: &'a [PublishRecord]) -> PublishFuture<'a> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(PublishError::NotConnected);
            }

            let qos = self.settings.qos();
            let mut sent = 0;
            // `publish` waits for room in the request queue, so batches larger
            // than the queue drain through the event loop instead of failing.
            let publish_all = async {
                for record in batch {
                    let topic = self.settings.topic_for(&record.sensor_id);
                    let payload = serde_json::to_vec(record)?;
                    if let Err(e) = self.client.publish(topic.as_str(), qos, false, payload).await {
                        warn!(%topic, "MQTT publish failed: {e}");
                        break;
                    }
                    sent += 1;
                }
                Ok::<(), PublishError>(())
            };
            let outcome = tokio::time::timeout(BATCH_TIMEOUT, publish_all).await;
            match outcome {
                Ok(result) => result?,
                Err(_) => warn!(sent, total = batch.len(), "MQTT batch timed out"),
            }

            if sent == batch.len() {
                Ok(sent)
            } else {
                Err(PublishError::Partial {
                    sent,
                    total: batch.len(),
                })
            }
        })
    }
}
