use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PublishError, PublishFuture, PublishRecord, Publisher};

fn default_endpoint() -> String {
    "http://localhost:9000/api/readings".into()
}

fn default_timeout_secs() -> u64 {
    10
}

/// HTTP batch publisher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `X-Api-Key` when non-empty.
    #[serde(default)]
    pub api_key: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            api_key: String::new(),
        }
    }
}

#[derive(Serialize)]
struct BatchBody<'a> {
    batch: &'a [PublishRecord],
}

/// POSTs `{"batch": [...]}` to a REST endpoint; any 2xx is success.
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPublisher {
    pub fn new(settings: &HttpSettings) -> Result<Self, PublishError> {
        if settings.endpoint.trim().is_empty() {
            return Err(PublishError::Config("no endpoint configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| PublishError::Http(e.to_string()))?;
        info!(endpoint = %settings.endpoint, "HTTP publisher ready");
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

impl Publisher for HttpPublisher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send<'a>(&'a self, batch: &'a [PublishRecord]) -> PublishFuture<'a> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(0);
            }

            let mut req = self.client.post(&self.endpoint).json(&BatchBody { batch });
            if !self.api_key.is_empty() {
                req = req.header("X-Api-Key", &self.api_key);
            }

            let response = req
                .send()
                .await
                .map_err(|e| PublishError::Http(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                warn!(endpoint = %self.endpoint, %status, "publish rejected");
                return Err(PublishError::Status(status.as_u16()));
            }
            Ok(batch.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn record(id: &str) -> PublishRecord {
        PublishRecord {
            sensor_id: id.into(),
            sensor_name: format!("Unit {id}"),
            ts: NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            vib_rms: 0.42,
            vib_peak: 1.1,
            temp: 24.0,
            humidity: 50.0,
            battery: 80,
            rssi: -60,
        }
    }

    /// Accepts one request, replies with `status`, and returns the raw request.
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/readings", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let reply = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn posts_batch_with_api_key() {
        let (url, server) = serve_once("200 OK").await;
        let publisher = HttpPublisher::new(&HttpSettings {
            endpoint: url,
            timeout_secs: 5,
            api_key: "secret-key".into(),
        })
        .unwrap();

        let sent = publisher.send(&[record("A"), record("B")]).await.unwrap();
        assert_eq!(sent, 2);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/readings"));
        assert!(request.to_ascii_lowercase().contains("x-api-key: secret-key"));
        assert!(request.contains(r#""batch":["#));
        assert!(request.contains(r#""sensor_id":"B""#));
    }

    #[tokio::test]
    async fn non_2xx_is_failure() {
        let (url, server) = serve_once("503 Service Unavailable").await;
        let publisher = HttpPublisher::new(&HttpSettings {
            endpoint: url,
            ..HttpSettings::default()
        })
        .unwrap();

        let err = publisher.send(&[record("A")]).await.unwrap_err();
        assert!(matches!(err, PublishError::Status(503)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let publisher = HttpPublisher::new(&HttpSettings {
            endpoint: format!("http://127.0.0.1:{port}/x"),
            timeout_secs: 2,
            api_key: String::new(),
        })
        .unwrap();

        assert!(matches!(
            publisher.send(&[record("A")]).await,
            Err(PublishError::Http(_))
        ));
    }

    #[tokio::test]
    async fn empty_batch_skips_network() {
        let publisher = HttpPublisher::new(&HttpSettings {
            endpoint: "http://127.0.0.1:1/never".into(),
            ..HttpSettings::default()
        })
        .unwrap();
        assert_eq!(publisher.send(&[]).await.unwrap(), 0);
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let settings = HttpSettings {
            endpoint: "  ".into(),
            ..HttpSettings::default()
        };
        assert!(matches!(
            HttpPublisher::new(&settings),
            Err(PublishError::Config(_))
        ));
    }
}
